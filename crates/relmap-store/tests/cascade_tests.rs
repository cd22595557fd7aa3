// Integration tests for delete cascades
// Composite children are deleted with their parent; shared children only
// lose their foreign key

mod common;

use common::{scalar, seed_author, session_on, set, setup};
use relmap_core::{BuildDepth, EntityRef, ObjectId, OrmConfig, Session};

fn seed_order(session: &mut Session) -> i64 {
    let order = session.create("Order", BuildDepth::Single).unwrap();
    set(&order, "customer", "ACME");
    for sku in ["A-1", "B-2"] {
        let line = session.create("OrderLine", BuildDepth::Single).unwrap();
        set(&line, "sku", sku);
        session.associate(&order, "lines", &line).unwrap();
        let note: EntityRef = session.create("LineNote", BuildDepth::Single).unwrap();
        set(&note, "text", "fragile");
        session.associate(&line, "notes", &note).unwrap();
    }
    session.commit().unwrap();
    let id = order.borrow().oid().first_id().and_then(|id| id.as_i64());
    id.unwrap()
}

#[test]
fn test_composite_delete_removes_children_and_grandchildren() {
    // Given: an order with two lines, each carrying a note
    let (conn, mut writer) = setup();
    let id = seed_order(&mut writer);
    assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM orderline"), 2);
    assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM linenote"), 2);

    // When: only the order is loaded and deleted
    let mut session = session_on(conn.clone(), OrmConfig::default());
    let order = session
        .load(&ObjectId::with_int("Order", id), BuildDepth::Single)
        .unwrap()
        .unwrap();
    session.delete(&order);
    let report = session.commit().unwrap();

    // Then: every row of the aggregate is gone
    assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM orders"), 0);
    assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM orderline"), 0);
    assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM linenote"), 0);
    assert_eq!(report.deleted.len(), 5);
    assert_eq!(
        report.deleted.last(),
        Some(&ObjectId::with_int("Order", id))
    );

    // And: nothing of the aggregate is still tracked
    assert!(!session.is_tracked(&ObjectId::with_int("Order", id)));
    assert!(!session.is_tracked(&ObjectId::with_int("OrderLine", 1)));
}

#[test]
fn test_deleting_an_unsaved_order_drops_its_unsaved_lines() {
    // Given: a new order created with its mandatory line
    let (conn, mut session) = setup();
    let order = session.create("Order", BuildDepth::Required).unwrap();
    let line = order.borrow().related("lines")[0].clone();
    let line = line.as_object().unwrap().clone();
    let line_oid = line.borrow().oid().clone();

    // When: the order is deleted before anything was saved
    session.delete(&order);
    let report = session.commit().unwrap();

    // Then: the line is dropped too and no orphan row is written
    assert!(report.inserted.is_empty());
    assert!(report.deleted.is_empty());
    assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM orders"), 0);
    assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM orderline"), 0);
    assert!(!session.is_tracked(&line_oid));
}

#[test]
fn test_shared_delete_releases_children() {
    // Given: an author with two books, loaded with its books
    let (conn, mut writer) = setup();
    let id = seed_author(&mut writer, "Banks", &["Excession", "Matter"]);
    let mut session = session_on(conn.clone(), OrmConfig::default());
    let author = session
        .load(&ObjectId::with_int("Author", id), BuildDepth::Infinite)
        .unwrap()
        .unwrap();
    let books: Vec<EntityRef> = author
        .borrow()
        .related("books")
        .iter()
        .filter_map(|r| r.as_object().cloned())
        .collect();
    assert_eq!(books.len(), 2);

    // When: the author is deleted
    session.delete(&author);
    session.commit().unwrap();

    // Then: the books survive without an author
    assert_eq!(scalar(&conn, "SELECT COUNT(*) FROM author"), 0);
    assert_eq!(
        scalar(&conn, "SELECT COUNT(*) FROM book WHERE author_id IS NULL"),
        2
    );

    // And: the tracked books no longer point at the deleted author
    for book in &books {
        assert!(book.borrow().related("author").is_empty());
    }
}

#[test]
fn test_moving_a_child_updates_its_foreign_key() {
    // Given: two authors, the first with one book
    let (conn, mut session) = setup();
    seed_author(&mut session, "First", &["Moved"]);
    let second_id = seed_author(&mut session, "Second", &[]);
    let book = session
        .load(&ObjectId::with_int("Book", 1), BuildDepth::Single)
        .unwrap()
        .unwrap();
    let second = session
        .load(&ObjectId::with_int("Author", second_id), BuildDepth::Single)
        .unwrap()
        .unwrap();

    // When: the book is associated with the second author
    session.associate(&book, "author", &second).unwrap();
    let report = session.commit().unwrap();

    // Then: only the book is updated, with the new foreign key
    assert_eq!(report.updated, vec![ObjectId::with_int("Book", 1)]);
    assert_eq!(
        scalar(&conn, "SELECT author_id FROM book WHERE id = 1"),
        second_id
    );
}
