// Merge Tests
// Last-writer-wins reconciliation: scenarios and properties

use meshdoc::document::{merge, merge_with_result, Document, Item};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

fn item(id: &str, ts: u64, text: &str) -> Item {
    Item {
        id: id.to_string(),
        updated_at: ts,
        text: text.to_string(),
        completed: false,
    }
}

fn doc(id: &str, items: Vec<Item>) -> Document {
    Document {
        id: id.to_string(),
        items,
    }
}

/// Random document drawing ids from a small shared pool so inputs overlap
fn random_document(rng: &mut StdRng, id: &str) -> Document {
    let count = rng.gen_range(0..8);
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for _ in 0..count {
        let item_id = format!("item-{}", rng.gen_range(0..10));
        if !seen.insert(item_id.clone()) {
            continue;
        }
        items.push(Item {
            id: item_id,
            updated_at: rng.gen_range(0..5),
            text: format!("text-{}", rng.gen_range(0..3)),
            completed: rng.gen_bool(0.5),
        });
    }

    doc(id, items)
}

fn ids(document: &Document) -> HashSet<String> {
    document.items.iter().map(|i| i.id.clone()).collect()
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn test_remote_strictly_newer_wins() {
    let local = doc("L", vec![item("a", 10, "x")]);
    let remote = doc("R", vec![item("a", 20, "x-edited")]);

    let merged = merge(&local, &remote);

    assert_eq!(merged.items.len(), 1);
    assert_eq!(merged.items[0].id, "a");
    assert_eq!(merged.items[0].text, "x-edited");
    assert_eq!(merged.items[0].updated_at, 20);
}

#[test]
fn test_remote_older_is_ignored() {
    let local = doc("L", vec![item("a", 10, "x")]);
    let remote = doc("R", vec![item("a", 5, "x-stale")]);

    let outcome = merge_with_result(&local, &remote);

    assert_eq!(outcome.document.items, vec![item("a", 10, "x")]);
    assert_eq!(outcome.unchanged, 1);
    assert!(!outcome.changed());
}

#[test]
fn test_disjoint_items_are_unioned() {
    let local = doc("L", vec![item("a", 10, "")]);
    let remote = doc("R", vec![item("b", 10, "")]);

    let outcome = merge_with_result(&local, &remote);

    assert_eq!(ids(&outcome.document), ["a", "b"].iter().map(|s| s.to_string()).collect());
    assert_eq!(outcome.added, 1);
}

#[test]
fn test_merge_keeps_local_document_id() {
    let merged = merge(&doc("L", vec![]), &doc("R", vec![item("a", 1, "")]));
    assert_eq!(merged.id, "L");
}

#[test]
fn test_merge_with_empty_remote_is_identity() {
    let local = doc("L", vec![item("a", 3, "x"), item("b", 1, "y")]);
    let outcome = merge_with_result(&local, &doc("R", vec![]));

    assert_eq!(outcome.document, local);
    assert!(!outcome.changed());
}

#[test]
fn test_same_timestamp_conflict_favors_local() {
    let local = doc("L", vec![item("a", 7, "mine")]);
    let remote = doc("R", vec![item("a", 7, "theirs")]);

    assert_eq!(merge(&local, &remote).items[0].text, "mine");
    // Not commutative for equal timestamps
    assert_eq!(merge(&remote, &local).items[0].text, "theirs");
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[test]
fn test_merge_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..200 {
        let d = random_document(&mut rng, "D");
        assert_eq!(merge(&d, &d), d);
    }
}

#[test]
fn test_merge_is_union_complete() {
    let mut rng = StdRng::seed_from_u64(2);
    for _ in 0..200 {
        let a = random_document(&mut rng, "A");
        let b = random_document(&mut rng, "B");

        let merged = merge(&a, &b);
        let expected: HashSet<String> = ids(&a).union(&ids(&b)).cloned().collect();

        assert_eq!(ids(&merged), expected);
        assert_eq!(merged.items.len(), expected.len());
        assert!(merged.validate().is_ok());
    }
}

#[test]
fn test_merge_is_monotonic_per_item() {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..200 {
        let a = random_document(&mut rng, "A");
        let b = random_document(&mut rng, "B");
        let merged = merge(&a, &b);

        for survivor in &merged.items {
            if let (Some(x), Some(y)) = (a.item(&survivor.id), b.item(&survivor.id)) {
                assert!(survivor.updated_at >= x.updated_at.min(y.updated_at));
                assert_eq!(survivor.updated_at, x.updated_at.max(y.updated_at));
            }
        }
    }
}

#[test]
fn test_repeated_exchange_converges() {
    let mut rng = StdRng::seed_from_u64(4);
    for _ in 0..100 {
        let mut a = random_document(&mut rng, "A");
        let mut b = random_document(&mut rng, "B");

        // One gossip round each way
        a = merge(&a, &b);
        b = merge(&b, &a);
        a = merge(&a, &b);

        let mut a_items = a.items.clone();
        let mut b_items = b.items.clone();
        a_items.sort_by(|x, y| x.id.cmp(&y.id));
        b_items.sort_by(|x, y| x.id.cmp(&y.id));

        // Same ids and timestamps; content can only differ on exact ties
        assert_eq!(a_items.len(), b_items.len());
        for (x, y) in a_items.iter().zip(b_items.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.updated_at, y.updated_at);
        }
    }
}
