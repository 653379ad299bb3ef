// Wire Codec Tests

use meshdoc::document::{Document, DocumentError, Item};
use meshdoc::sync::{CodecError, DocumentCodec};

#[test]
fn test_encode_is_single_line_document_json() {
    let document = Document {
        id: "L".to_string(),
        items: vec![Item {
            id: "a".to_string(),
            updated_at: 42,
            text: "line one\nline two".to_string(),
            completed: false,
        }],
    };

    let frame = DocumentCodec::encode(&document).unwrap();

    assert!(!frame.contains('\n'));
    assert_eq!(
        frame,
        concat!(
            r#"{"id":"L","items":[{"id":"a","lastUpdated":42,"#,
            r#""text":"line one\nline two","completed":false}]}"#
        )
    );
    assert_eq!(DocumentCodec::decode(&frame).unwrap(), document);
}

#[test]
fn test_decode_garbage() {
    assert!(matches!(
        DocumentCodec::decode("not json at all"),
        Err(CodecError::DecodeError(_))
    ));
    assert!(matches!(
        DocumentCodec::decode(r#"{"id":"L"}"#),
        Err(CodecError::DecodeError(_))
    ));
    assert!(matches!(
        DocumentCodec::decode(r#"[{"id":"L","items":[]}]"#),
        Err(CodecError::DecodeError(_))
    ));
}

#[test]
fn test_decode_rejects_invalid_document() {
    let payload = r#"{"id":"R","items":[
        {"id":"x","lastUpdated":1,"text":"","completed":false},
        {"id":"x","lastUpdated":1,"text":"","completed":false}
    ]}"#;

    assert_eq!(
        DocumentCodec::decode(payload),
        Err(CodecError::InvalidDocument(DocumentError::DuplicateItemId("x".to_string())))
    );
}

#[test]
fn test_decode_ignores_unknown_fields() {
    let payload = r#"{"id":"R","owner":"someone","items":[
        {"id":"x","lastUpdated":3,"text":"t","completed":true,"color":"red"}
    ]}"#;

    let document = DocumentCodec::decode(payload).unwrap();
    assert_eq!(document.items[0].updated_at, 3);
}
