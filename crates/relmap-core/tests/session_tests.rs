// Integration tests for the session facade over a scripted fake store
// Covers type routing, commit statement order, hooks and failure handling

mod common;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use common::{author, book, library, FakeStore};
use relmap_core::errors::Result;
use relmap_core::hooks::EntityHooks;
use relmap_core::meta::{Multiplicity, RelationDescription};
use relmap_core::validation::{Validator, Violation};
use relmap_core::{
    BuildDepth, ObjectId, OrmError, PersistentObject, Session, TypeDescription, Value,
};

#[test]
fn test_simple_and_qualified_names_reach_the_same_type() {
    // Given: a session with lib.Author registered
    let (_store, session) = library();

    // Then: both spellings resolve to one description
    let by_simple = session.type_description("Author").unwrap();
    let by_qualified = session.type_description("lib.Author").unwrap();
    assert!(Rc::ptr_eq(&by_simple, &by_qualified));
}

#[test]
fn test_colliding_simple_names_require_qualification() {
    // Given: two qualified types sharing the simple name Person
    let store = Rc::new(FakeStore::default());
    let mut session = Session::new(store.clone(), store);
    for name in ["hr.Person", "crm.Person"] {
        session
            .register(TypeDescription::builder(name).build().unwrap())
            .unwrap();
    }

    // Then: the simple name is refused and the qualified names work
    assert!(matches!(
        session.type_description("Person"),
        Err(OrmError::UnknownType { .. })
    ));
    assert!(session.type_description("hr.Person").is_ok());
    assert!(session.type_description("crm.Person").is_ok());
}

#[test]
fn test_registering_a_type_twice_fails() {
    let (_store, mut session) = library();
    assert!(matches!(
        session.register(author()),
        Err(OrmError::InvalidConfiguration { .. })
    ));
}

#[test]
fn test_commit_writes_parents_first_inside_one_transaction() {
    // Given: a new book referencing a new author created after it
    let (store, mut session) = library();
    let book = session.create("Book", BuildDepth::Single).unwrap();
    book.borrow_mut().set("title", "Solaris").unwrap();
    let author = session.create("Author", BuildDepth::Single).unwrap();
    author.borrow_mut().set("name", "Stanislaw Lem").unwrap();
    session.associate(&book, "author", &author).unwrap();

    // When: the session commits
    session.commit().unwrap();

    // Then: the author insert precedes the book insert
    let writes = store.writes();
    assert_eq!(writes.len(), 2);
    assert!(writes[0].starts_with("INSERT INTO author"));
    assert!(writes[1].starts_with("INSERT INTO book"));

    // And: the book insert binds the author's allocated id
    let statements = store.statements.borrow();
    let insert_book = statements
        .iter()
        .find(|s| s.sql.starts_with("INSERT INTO book"))
        .unwrap();
    assert!(insert_book.params.contains(&Value::Int(1)));
    assert!(insert_book.params.contains(&Value::from("Solaris")));

    // And: every begun transaction was committed, none rolled back
    assert_eq!(store.begins.get(), store.commits.get());
    assert_eq!(store.rollbacks.get(), 0);
}

#[test]
fn test_commit_points_proxies_at_allocated_ids() {
    // Given: a new book whose author proxy still names a dummy id
    let (_store, mut session) = library();
    let author = session.create("Author", BuildDepth::Single).unwrap();
    author.borrow_mut().set("name", "Ursula K. Le Guin").unwrap();
    let book = session.create("Book", BuildDepth::Single).unwrap();
    session.associate(&book, "author", &author).unwrap();
    let dummy = author.borrow().oid().clone();
    assert!(dummy.is_dummy());

    // When: the session commits
    let report = session.commit().unwrap();

    // Then: the dummy id was replaced and the proxy follows it
    let (_, allocated) = report
        .remapped
        .iter()
        .find(|(old, _)| old == &dummy)
        .cloned()
        .unwrap();
    assert_eq!(author.borrow().oid(), &allocated);
    let proxy = book.borrow().related("author")[0].clone();
    assert!(proxy.is_proxy());
    assert_eq!(proxy.oid(), allocated);

    // And: both ids still reach the one tracked author
    let resolved = session.resolve(&proxy).unwrap().unwrap();
    assert!(Rc::ptr_eq(&resolved, &author));
    assert!(session.is_tracked(&dummy));
}

#[test]
fn test_storage_failure_rolls_back_and_clears() {
    // Given: a store failing book inserts
    let (store, mut session) = library();
    store.fail_on("INSERT INTO book");
    let author = session.create("Author", BuildDepth::Single).unwrap();
    author.borrow_mut().set("name", "Lem").unwrap();
    let book = session.create("Book", BuildDepth::Single).unwrap();
    session.associate(&book, "author", &author).unwrap();
    let author_oid = author.borrow().oid().clone();

    // When: the session commits
    let err = session.commit().unwrap_err();

    // Then: the failure carries the statement and everything is rolled back
    match err {
        OrmError::Persistence { statement, .. } => {
            assert!(statement.unwrap().starts_with("INSERT INTO book"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(store.rollbacks.get() >= 1);
    assert!(!session.is_tracked(&author_oid));
    assert!(!session.unit_of_work().is_active());
}

#[test]
fn test_required_parent_dropped_before_save_fails_commit() {
    // Given: volumes that must sit on a shelf
    let store = Rc::new(FakeStore::default());
    let mut session = Session::new(store.clone(), store.clone());
    session
        .register(
            TypeDescription::builder("Shelf")
                .relation(RelationDescription::one_to_many(
                    "Shelf", "shelf", "Volume", "volumes", "id", "shelf_id",
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
    session
        .register(
            TypeDescription::builder("Volume")
                .relation(
                    RelationDescription::many_to_one(
                        "Volume", "volumes", "Shelf", "shelf", "shelf_id", "id",
                    )
                    .with_other_multiplicity(1, Multiplicity::Bounded(1)),
                )
                .build()
                .unwrap(),
        )
        .unwrap();

    // And: a new volume on a new shelf that is deleted again
    let shelf = session.create("Shelf", BuildDepth::Single).unwrap();
    let volume = session.create("Volume", BuildDepth::Single).unwrap();
    session.associate(&volume, "shelf", &shelf).unwrap();
    session.delete(&shelf);

    // When: the session commits
    let err = session.commit().unwrap_err();

    // Then: the volume is refused instead of being written without a shelf
    assert!(matches!(err, OrmError::IllegalArgument { .. }));
    assert!(store.writes().is_empty());
}

#[derive(Default)]
struct RecordingHooks {
    calls: RefCell<Vec<String>>,
    refuse_insert: bool,
}

impl EntityHooks for RecordingHooks {
    fn after_create(&self, entity: &mut PersistentObject) -> Result<()> {
        self.calls.borrow_mut().push("after_create".to_string());
        entity.set("name", "Anonymous").map(|_| ())
    }

    fn before_insert(&self, _entity: &mut PersistentObject) -> Result<()> {
        self.calls.borrow_mut().push("before_insert".to_string());
        if self.refuse_insert {
            return Err(OrmError::illegal_argument("insert refused by hook"));
        }
        Ok(())
    }

    fn after_insert(&self, _entity: &mut PersistentObject) -> Result<()> {
        self.calls.borrow_mut().push("after_insert".to_string());
        Ok(())
    }
}

fn hooked_session(hooks: Rc<RecordingHooks>) -> (Rc<FakeStore>, Session) {
    let store = Rc::new(FakeStore::default());
    let mut session = Session::new(store.clone(), store.clone());
    let description = TypeDescription::builder("Writer")
        .attribute(relmap_core::AttributeDescription::new(
            "name",
            relmap_core::ValueType::Text,
        ))
        .hooks(hooks)
        .build()
        .unwrap();
    session.register(description).unwrap();
    (store, session)
}

#[test]
fn test_hooks_run_around_insert() {
    // Given: a type with recording hooks
    let hooks = Rc::new(RecordingHooks::default());
    let (_store, mut session) = hooked_session(hooks.clone());

    // When: an entity is created and committed
    let writer = session.create("Writer", BuildDepth::Single).unwrap();
    session.commit().unwrap();

    // Then: the hooks ran in lifecycle order and after_create set a value
    assert_eq!(
        *hooks.calls.borrow(),
        vec!["after_create", "before_insert", "after_insert"]
    );
    assert_eq!(writer.borrow().value("name"), Value::from("Anonymous"));
}

#[test]
fn test_hook_error_aborts_commit() {
    let hooks = Rc::new(RecordingHooks {
        refuse_insert: true,
        ..RecordingHooks::default()
    });
    let (store, mut session) = hooked_session(hooks);
    session.create("Writer", BuildDepth::Single).unwrap();

    let err = session.commit().unwrap_err();

    assert!(matches!(err, OrmError::IllegalArgument { .. }));
    assert!(store.writes().is_empty());
}

struct NoLemons;

impl Validator for NoLemons {
    fn validate(&self, entity: &PersistentObject) -> Vec<Violation> {
        match entity.value("title") {
            Value::Text(title) if title.contains("Lemon") => {
                vec![Violation::new("title", "no lemons")]
            }
            _ => Vec::new(),
        }
    }
}

#[test]
fn test_custom_validator_rejects_commit() {
    // Given: a session whose validator forbids lemon titles
    let (store, session) = library();
    let mut session = session.with_validator(Rc::new(NoLemons));
    let book = session.create("Book", BuildDepth::Single).unwrap();
    book.borrow_mut().set("title", "Lemon Grove").unwrap();

    // When: the session commits
    let err = session.commit().unwrap_err();

    // Then: the violation is reported and nothing was written
    match err {
        OrmError::Validation { violations } => {
            assert_eq!(violations, vec![Violation::new("title", "no lemons")]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(store.writes().is_empty());
}

#[test]
fn test_load_builds_entity_from_scripted_row() {
    // Given: the store answers the next query with one book row
    let (store, mut session) = library();
    let row: BTreeMap<String, Value> = [
        ("id".to_string(), Value::Int(3)),
        ("author_id".to_string(), Value::Int(9)),
        ("title".to_string(), Value::from("Fiasco")),
    ]
    .into_iter()
    .collect();
    store.script(vec![row]);

    // When: the book is loaded
    let book = session
        .load(&ObjectId::with_int("Book", 3), BuildDepth::Single)
        .unwrap()
        .unwrap();

    // Then: attributes and the author proxy come from the row
    let book = book.borrow();
    assert_eq!(book.oid(), &ObjectId::with_int("lib.Book", 3));
    assert_eq!(book.value("title"), Value::from("Fiasco"));
    assert_eq!(
        book.related("author")[0].oid(),
        ObjectId::with_int("lib.Author", 9)
    );
}

#[test]
fn test_associate_rejects_wrong_type() {
    let (_store, mut session) = library();
    let a = session.create("Author", BuildDepth::Single).unwrap();
    let b = session.create("Author", BuildDepth::Single).unwrap();
    assert!(matches!(
        session.associate(&a, "books", &b),
        Err(OrmError::IllegalArgument { .. })
    ));
    assert!(matches!(
        session.associate(&a, "nope", &b),
        Err(OrmError::UnknownRole { .. })
    ));
}

#[test]
fn test_book_fixture_declares_author_role() {
    assert!(book().has_relation("author"));
}
