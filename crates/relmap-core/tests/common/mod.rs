//! Shared fixtures for relmap-core integration tests
//!
//! `FakeStore` stands in for a database: it records every statement,
//! answers queries from a script and hands out ids per sequence.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use relmap_core::errors::{OrmError, Result};
use relmap_core::meta::RelationDescription;
use relmap_core::query::SqlStatement;
use relmap_core::storage::{Row, SequenceAllocator, StatementExecutor};
use relmap_core::{AttributeDescription, Session, TypeDescription, ValueType};

#[derive(Default)]
pub struct FakeStore {
    pub statements: RefCell<Vec<SqlStatement>>,
    pub scripted: RefCell<VecDeque<Vec<Row>>>,
    pub fail_on: RefCell<Option<String>>,
    pub begins: Cell<u32>,
    pub commits: Cell<u32>,
    pub rollbacks: Cell<u32>,
    sequences: RefCell<HashMap<String, i64>>,
}

impl FakeStore {
    /// Queue the rows returned by the next query
    pub fn script(&self, rows: Vec<Row>) {
        self.scripted.borrow_mut().push_back(rows);
    }

    /// Make statements containing `fragment` fail
    pub fn fail_on(&self, fragment: &str) {
        *self.fail_on.borrow_mut() = Some(fragment.to_string());
    }

    /// SQL text of every recorded statement that is not a query
    pub fn writes(&self) -> Vec<String> {
        self.statements
            .borrow()
            .iter()
            .map(|s| s.sql.clone())
            .filter(|sql| !sql.starts_with("SELECT"))
            .collect()
    }

    fn check(&self, statement: &SqlStatement) -> Result<()> {
        self.statements.borrow_mut().push(statement.clone());
        match self.fail_on.borrow().as_deref() {
            Some(fragment) if statement.sql.contains(fragment) => Err(OrmError::persistence(
                "fake",
                None,
                format!("injected failure on '{}'", fragment),
            )),
            _ => Ok(()),
        }
    }
}

impl StatementExecutor for FakeStore {
    fn execute_query(&self, statement: &SqlStatement) -> Result<Vec<Row>> {
        self.check(statement)?;
        Ok(self.scripted.borrow_mut().pop_front().unwrap_or_default())
    }

    fn execute_statement(&self, statement: &SqlStatement) -> Result<usize> {
        self.check(statement)?;
        Ok(1)
    }

    fn begin(&self) -> Result<()> {
        self.begins.set(self.begins.get() + 1);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.commits.set(self.commits.get() + 1);
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.rollbacks.set(self.rollbacks.get() + 1);
        Ok(())
    }
}

impl SequenceAllocator for FakeStore {
    fn next_id(&self, sequence: &str) -> Result<i64> {
        let mut sequences = self.sequences.borrow_mut();
        let next = sequences.entry(sequence.to_string()).or_insert(0);
        *next += 1;
        Ok(*next)
    }
}

pub fn author() -> TypeDescription {
    TypeDescription::builder("lib.Author")
        .attribute(AttributeDescription::new("name", ValueType::Text).required())
        .relation(RelationDescription::one_to_many(
            "lib.Author", "author", "lib.Book", "books", "id", "author_id",
        ))
        .build()
        .unwrap()
}

pub fn book() -> TypeDescription {
    TypeDescription::builder("lib.Book")
        .attribute(AttributeDescription::new("title", ValueType::Text))
        .relation(RelationDescription::many_to_one(
            "lib.Book", "books", "lib.Author", "author", "author_id", "id",
        ))
        .build()
        .unwrap()
}

/// Session over a fresh fake store with the library types registered
pub fn library() -> (Rc<FakeStore>, Session) {
    let store = Rc::new(FakeStore::default());
    let mut session = Session::new(store.clone(), store.clone());
    session.register(author()).unwrap();
    session.register(book()).unwrap();
    (store, session)
}
