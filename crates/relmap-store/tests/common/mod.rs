//! Shared fixtures for relmap-store integration tests
//!
//! One in-memory database with a small catalogue of types:
//! - Author 1..n Book (shared: deleting an author clears `author_id`)
//! - Order 1..n OrderLine 1..n LineNote (composite: deletes cascade)
//! - Project n..m Person through the ProjectMember junction
//! - Node 1..n Node (self-referencing tree)

#![allow(dead_code)]

use std::rc::Rc;

use relmap_core::meta::{
    AggregationKind, Multiplicity, ReferenceDescription, RelationDescription,
};
use relmap_core::{
    AttributeDescription, EntityRef, OrmConfig, Session, TypeDescription, Value, ValueType,
};
use relmap_store::db::open_in_memory;
use relmap_store::open_session;
use relmap_store::schema::create_tables;
use rusqlite::Connection;

pub const TABLE_ORDER: &[&str] = &[
    "Author",
    "Book",
    "Order",
    "OrderLine",
    "LineNote",
    "Project",
    "Person",
    "ProjectMember",
    "Node",
];

pub fn author() -> TypeDescription {
    TypeDescription::builder("Author")
        .attribute(AttributeDescription::new("name", ValueType::Text).required())
        .attribute(AttributeDescription::new("born", ValueType::Integer))
        .relation(
            RelationDescription::one_to_many("Author", "author", "Book", "books", "id", "author_id")
                .with_other_aggregation(AggregationKind::Shared),
        )
        .build()
        .unwrap()
}

pub fn book() -> TypeDescription {
    TypeDescription::builder("Book")
        .attribute(AttributeDescription::new("title", ValueType::Text))
        .attribute(AttributeDescription::new("in_print", ValueType::Boolean).with_default(true))
        .relation(RelationDescription::many_to_one(
            "Book", "books", "Author", "author", "author_id", "id",
        ))
        .reference(ReferenceDescription::new("author_name", "author", "name"))
        .build()
        .unwrap()
}

pub fn order() -> TypeDescription {
    TypeDescription::builder("Order")
        .table("orders")
        .attribute(AttributeDescription::new("customer", ValueType::Text))
        .relation(
            RelationDescription::one_to_many("Order", "order", "OrderLine", "lines", "id", "order_id")
                .with_this_aggregation(AggregationKind::Composite)
                .with_other_aggregation(AggregationKind::Composite)
                .with_other_multiplicity(1, Multiplicity::Unbound),
        )
        .build()
        .unwrap()
}

pub fn order_line() -> TypeDescription {
    TypeDescription::builder("OrderLine")
        .attribute(AttributeDescription::new("sku", ValueType::Text))
        .attribute(AttributeDescription::new("quantity", ValueType::Integer).with_default(1i64))
        .relation(RelationDescription::many_to_one(
            "OrderLine", "lines", "Order", "order", "order_id", "id",
        ))
        .relation(
            RelationDescription::one_to_many("OrderLine", "line", "LineNote", "notes", "id", "line_id")
                .with_this_aggregation(AggregationKind::Composite),
        )
        .build()
        .unwrap()
}

pub fn line_note() -> TypeDescription {
    TypeDescription::builder("LineNote")
        .attribute(AttributeDescription::new("text", ValueType::Text))
        .relation(RelationDescription::many_to_one(
            "LineNote", "notes", "OrderLine", "line", "line_id", "id",
        ))
        .build()
        .unwrap()
}

fn members_of(this: &str, this_fk: &str, other: &str, other_fk: &str, role: &str) -> RelationDescription {
    let to_junction =
        RelationDescription::one_to_many(this, "owner", "ProjectMember", "memberships", "id", this_fk);
    let to_other =
        RelationDescription::many_to_one("ProjectMember", "memberships", other, role, other_fk, "id");
    RelationDescription::many_to_many(to_junction, to_other).unwrap()
}

pub fn project() -> TypeDescription {
    TypeDescription::builder("Project")
        .attribute(AttributeDescription::new("title", ValueType::Text))
        .relation(members_of("Project", "project_id", "Person", "person_id", "members"))
        .build()
        .unwrap()
}

pub fn person() -> TypeDescription {
    TypeDescription::builder("Person")
        .attribute(AttributeDescription::new("name", ValueType::Text))
        .relation(members_of("Person", "person_id", "Project", "project_id", "projects"))
        .build()
        .unwrap()
}

pub fn project_member() -> TypeDescription {
    TypeDescription::builder("ProjectMember")
        .relation(RelationDescription::many_to_one(
            "ProjectMember", "memberships", "Project", "project", "project_id", "id",
        ))
        .relation(RelationDescription::many_to_one(
            "ProjectMember", "person_memberships", "Person", "person", "person_id", "id",
        ))
        .build()
        .unwrap()
}

pub fn node() -> TypeDescription {
    TypeDescription::builder("Node")
        .attribute(AttributeDescription::new("label", ValueType::Text))
        .relation(RelationDescription::many_to_one(
            "Node", "children", "Node", "parent", "parent_id", "id",
        ))
        .relation(RelationDescription::one_to_many(
            "Node", "parent", "Node", "children", "id", "parent_id",
        ))
        .build()
        .unwrap()
}

/// Connection plus a session with every fixture type registered and its
/// table created
pub fn setup() -> (Rc<Connection>, Session) {
    setup_with(OrmConfig::default())
}

pub fn setup_with(config: OrmConfig) -> (Rc<Connection>, Session) {
    let conn = Rc::new(open_in_memory().unwrap());
    let session = session_on(conn.clone(), config);
    (conn, session)
}

/// Fresh session (empty identity map) over an existing connection
pub fn session_on(conn: Rc<Connection>, config: OrmConfig) -> Session {
    let mut session = open_session(conn.clone(), config).unwrap();
    for description in [
        author(),
        book(),
        order(),
        order_line(),
        line_note(),
        project(),
        person(),
        project_member(),
        node(),
    ] {
        session.register(description).unwrap();
    }
    create_tables(&conn, TABLE_ORDER, session.registry()).unwrap();
    session
}

/// Single integer from a scalar query
pub fn scalar(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

pub fn set(entity: &EntityRef, name: &str, value: impl Into<Value>) {
    entity.borrow_mut().set(name, value).unwrap();
}

pub fn id_of(entity: &EntityRef) -> i64 {
    entity
        .borrow()
        .oid()
        .first_id()
        .and_then(|id| id.as_i64())
        .unwrap()
}

/// Committed author with the given books; returns the author's id
pub fn seed_author(session: &mut Session, name: &str, titles: &[&str]) -> i64 {
    let author = session.create("Author", relmap_core::BuildDepth::Single).unwrap();
    set(&author, "name", name);
    for title in titles {
        let book = session.create("Book", relmap_core::BuildDepth::Single).unwrap();
        set(&book, "title", *title);
        session.associate(&book, "author", &author).unwrap();
    }
    session.commit().unwrap();
    id_of(&author)
}
