//! Session facade: one unit of work over a set of registered types
//!
//! The session is an explicit context object owned by the caller. It
//! routes type names to mappers, attaches loaded and created entities to
//! its unit of work, and drives commit and rollback.
//!
//! - `graph`: depth-bounded load and create, proxy resolution, union query
//! - `persist`: insert, update and delete of single entities with cascade
//!   and junction handling
//! - `commit`: the commit loop and rollback

use std::collections::BTreeSet;
use std::rc::Rc;

use serde::Serialize;

use relmap_core_types::RequestContext;

use crate::audit::{AuditSink, NoopAuditSink};
use crate::config::OrmConfig;
use crate::errors::{OrmError, Result};
use crate::events::PersistenceListener;
use crate::mapper::Mapper;
use crate::meta::{ManyToManyRelation, RelationKind, TypeDescription};
use crate::model::{EntityRef, ObjectId, Related, Value};
use crate::policy::{Action, AllowAllPolicy, AuthorizationChecker};
use crate::storage::{SequenceAllocator, StatementExecutor};
use crate::uow::UnitOfWork;
use crate::validation::{NoopValidator, Validator};

pub mod commit;
pub mod graph;
pub mod persist;
pub mod registry;

pub use graph::{LoadOptions, UnionPage};
pub use registry::TypeRegistry;

/// What a successful commit did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    /// Dummy ids and the final ids they were replaced by
    pub remapped: Vec<(ObjectId, ObjectId)>,
    pub inserted: Vec<ObjectId>,
    pub updated: Vec<ObjectId>,
    pub deleted: Vec<ObjectId>,
}

pub struct Session {
    registry: TypeRegistry,
    uow: UnitOfWork,
    config: OrmConfig,
    context: RequestContext,
    executor: Rc<dyn StatementExecutor>,
    sequence: Rc<dyn SequenceAllocator>,
    authorization: Rc<dyn AuthorizationChecker>,
    validator: Rc<dyn Validator>,
    audit: Rc<dyn AuditSink>,
    listeners: Vec<Rc<dyn PersistenceListener>>,
    elevated_reads: bool,
}

impl Session {
    pub fn new(executor: Rc<dyn StatementExecutor>, sequence: Rc<dyn SequenceAllocator>) -> Self {
        Self {
            registry: TypeRegistry::new(),
            uow: UnitOfWork::new(),
            config: OrmConfig::default(),
            context: RequestContext::new(),
            executor,
            sequence,
            authorization: Rc::new(AllowAllPolicy),
            validator: Rc::new(NoopValidator),
            audit: Rc::new(NoopAuditSink),
            listeners: Vec::new(),
            elevated_reads: false,
        }
    }

    pub fn with_config(mut self, config: OrmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_authorization(mut self, authorization: Rc<dyn AuthorizationChecker>) -> Self {
        self.authorization = authorization;
        self
    }

    pub fn with_validator(mut self, validator: Rc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_audit(mut self, audit: Rc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn add_listener(&mut self, listener: Rc<dyn PersistenceListener>) {
        self.listeners.push(listener);
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.uow
    }

    /// Register a type with a mapper over this session's storage
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the qualified name is taken.
    pub fn register(&mut self, description: TypeDescription) -> Result<()> {
        let mapper = Mapper::new(
            Rc::new(description),
            self.executor.clone(),
            self.sequence.clone(),
        );
        self.registry.register(mapper)
    }

    /// # Errors
    ///
    /// Returns `UnknownType` for unregistered names.
    pub fn type_description(&self, name: &str) -> Result<Rc<TypeDescription>> {
        self.registry.mapper(name).map(|m| m.meta().clone())
    }

    /// Prepared mapper for a simple or qualified type name
    ///
    /// # Errors
    ///
    /// `UnknownType`, or configuration errors from preparing references.
    pub fn mapper(&self, name: &str) -> Result<Rc<Mapper>> {
        let mapper = self.registry.mapper(name)?;
        mapper.prepare(&self.registry)?;
        Ok(mapper)
    }

    /// Whether `oid` is currently in the identity map
    pub fn is_tracked(&self, oid: &ObjectId) -> bool {
        self.uow.contains(oid)
    }

    /// Stop tracking `oid`; later changes to it are never persisted
    pub fn detach(&mut self, oid: &ObjectId) {
        self.uow.detach(oid);
    }

    /// Mark an entity for deletion at the next commit
    pub fn delete(&mut self, entity: &EntityRef) {
        entity.borrow_mut().delete();
    }

    /// Link `entity` and `other` through `role` of `entity`
    ///
    /// The to-one side records a tracked proxy (it carries the foreign
    /// key); the to-many side of a one-to-many relation lists the child
    /// without tracking. Many-to-many roles record a tracked proxy whose
    /// junction row is written at commit.
    ///
    /// # Errors
    ///
    /// `UnknownRole` for undeclared roles, `IllegalArgument` if `other`
    /// has the wrong type, `InvalidConfiguration` if no back relation
    /// carries the foreign key.
    pub fn associate(&mut self, entity: &EntityRef, role: &str, other: &EntityRef) -> Result<()> {
        let (meta, oid) = {
            let e = entity.borrow();
            (e.meta().clone(), e.oid().clone())
        };
        let (other_meta, other_oid) = {
            let o = other.borrow();
            (o.meta().clone(), o.oid().clone())
        };
        let relation = meta.relation(role)?;
        if !other_meta.is_named(relation.other_type()) {
            return Err(OrmError::illegal_argument(format!(
                "role '{}' of {} expects {}, got {}",
                role,
                meta.qualified_name(),
                relation.other_type(),
                other_meta.qualified_name()
            )));
        }

        match relation.kind() {
            RelationKind::OneToMany { fk_column, .. } => {
                let back = back_role(&other_meta, &meta, fk_column)?;
                other
                    .borrow_mut()
                    .set_related(&back, Related::Proxy(oid))?;
                entity
                    .borrow_mut()
                    .push_related_loaded(role, Related::Object(other.clone()));
            }
            RelationKind::ManyToOne { fk_column, .. } => {
                entity
                    .borrow_mut()
                    .set_related(role, Related::Proxy(other_oid))?;
                if let Some(children) = other_meta.relations().iter().find(|r| {
                    matches!(r.kind(), RelationKind::OneToMany { fk_column: fk, .. } if fk == fk_column)
                        && meta.is_named(r.other_type())
                }) {
                    other
                        .borrow_mut()
                        .push_related_loaded(children.role(), Related::Object(entity.clone()));
                }
            }
            RelationKind::ManyToMany(_) => {
                entity
                    .borrow_mut()
                    .add_related(role, Related::Proxy(other_oid))?;
            }
        }
        Ok(())
    }

    /// Undo [`Session::associate`]
    ///
    /// # Errors
    ///
    /// Same as [`Session::associate`].
    pub fn disassociate(
        &mut self,
        entity: &EntityRef,
        role: &str,
        other: &EntityRef,
    ) -> Result<()> {
        let (meta, oid) = {
            let e = entity.borrow();
            (e.meta().clone(), e.oid().clone())
        };
        let (other_meta, other_oid) = {
            let o = other.borrow();
            (o.meta().clone(), o.oid().clone())
        };
        let relation = meta.relation(role)?;
        match relation.kind() {
            RelationKind::OneToMany { fk_column, .. } => {
                let back = back_role(&other_meta, &meta, fk_column)?;
                other.borrow_mut().clear_related(&back)?;
                entity.borrow_mut().forget_related(role, &other_oid);
            }
            RelationKind::ManyToOne { .. } => {
                entity.borrow_mut().clear_related(role)?;
                for children in other_meta.relations_to(&meta) {
                    other.borrow_mut().forget_related(children.role(), &oid);
                }
            }
            RelationKind::ManyToMany(_) => {
                entity.borrow_mut().remove_related(role, &other_oid)?;
            }
        }
        Ok(())
    }

    /// Value of `column` on the entity `oid` names, falling back to its key
    fn key_value(&self, oid: &ObjectId, column: &str) -> Value {
        let canonical = self.uow.canonical_oid(oid);
        let tracked = self
            .uow
            .lookup(&canonical)
            .and_then(|e| e.try_borrow().ok().map(|e| e.value(column)))
            .filter(|v| !v.is_null());
        tracked.unwrap_or_else(|| canonical.first_id().map(Value::from).unwrap_or_default())
    }

    fn deny_read(&self, resource: &str) {
        tracing::warn!(
            component = module_path!(),
            op = "authorize",
            resource = %resource,
            action = %Action::Read,
            "read denied; object omitted"
        );
    }

    fn type_readable(&self, meta: &TypeDescription) -> bool {
        self.elevated_reads || self.authorization.is_authorized(meta.qualified_name(), Action::Read)
    }

    fn instance_readable(&self, oid: &ObjectId) -> bool {
        self.authorization.is_authorized(&oid.key(), Action::Read)
    }

    /// Fatal write-path check on the type and, once persisted, the instance
    fn authorize_write(&self, oid: &ObjectId, action: Action) -> Result<()> {
        let mut resources = vec![oid.type_name().to_string()];
        if !oid.is_dummy() {
            resources.push(oid.key());
        }
        for resource in resources {
            if !self.authorization.is_authorized(&resource, action) {
                tracing::warn!(
                    component = module_path!(),
                    op = "authorize",
                    resource = %resource,
                    action = %action,
                    "write denied"
                );
                return Err(OrmError::AuthorizationDenied {
                    resource,
                    action: action.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Types with a tracked entity, resolved to their mappers
    fn participating_mappers(&self) -> Result<Vec<Rc<Mapper>>> {
        let names: BTreeSet<String> = self.uow.participating_types();
        names.iter().map(|name| self.mapper(name)).collect()
    }
}

/// Many-to-one role of `child` whose foreign key is `fk_column` towards `parent`
pub(crate) fn back_role(
    child: &TypeDescription,
    parent: &TypeDescription,
    fk_column: &str,
) -> Result<String> {
    child
        .parent_relations()
        .find(|r| r.local_fk_column() == Some(fk_column) && parent.is_named(r.other_type()))
        .map(|r| r.role().to_string())
        .ok_or_else(|| OrmError::InvalidConfiguration {
            reason: format!(
                "{} has no many-to-one role to {} over '{}'",
                child.qualified_name(),
                parent.qualified_name(),
                fk_column
            ),
        })
}

/// Column names a many-to-many relation is stored through
pub(crate) struct JunctionColumns<'a> {
    /// Column of the owning type the junction points at
    pub this_id: &'a str,
    /// Junction column holding the owner's id
    pub this_fk: &'a str,
    /// Junction column holding the peer's id
    pub other_fk: &'a str,
    /// Column of the peer type the junction points at
    pub other_id: &'a str,
}

pub(crate) fn junction_columns(m2m: &ManyToManyRelation) -> Result<JunctionColumns<'_>> {
    match (m2m.this_end.kind(), m2m.other_end.kind()) {
        (
            RelationKind::OneToMany {
                id_column: this_id,
                fk_column: this_fk,
            },
            RelationKind::ManyToOne {
                fk_column: other_fk,
                id_column: other_id,
            },
        ) => Ok(JunctionColumns {
            this_id,
            this_fk,
            other_fk,
            other_id,
        }),
        _ => Err(OrmError::Internal {
            message: format!("malformed junction description for {}", m2m.junction_type),
        }),
    }
}
