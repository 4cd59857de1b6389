//! Message schema identity and the metadata side table.
//!
//! JS libraries built on Zod hang non-enumerable symbol properties off the
//! schema object to smuggle router metadata alongside it. There is no such
//! object here — a message's identity *is* a Rust type — so the side table
//! from the design notes becomes a registry keyed by `TypeId`, directly
//! grounded on `r2e-core::meta::MetaRegistry`'s
//! `HashMap<TypeId, Box<dyn Any + Send + Sync>>`.

use dashmap::DashMap;
use std::any::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    Event,
    Rpc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deprecated {
    Flag(bool),
    Message(String),
}

#[derive(Debug, Clone, Default)]
pub struct SchemaOpts {
    pub validate_outgoing: Option<bool>,
    pub strict: Option<bool>,
    pub deprecated: Option<Deprecated>,
}

/// Identity for a registrable message type. `TYPE` is the wire discriminant
/// carried in `Envelope::msg_type`; `KIND` says whether it's fire-and-forget
/// or request/response shaped.
///
/// Implemented by a plain unit-ish struct per message, e.g.:
/// `struct GetUser; impl MessageSchema for GetUser { const TYPE: &'static str = "GET_USER"; const KIND: SchemaKind = SchemaKind::Event; }`
pub trait MessageSchema: Send + Sync + 'static {
    const TYPE: &'static str;
    const KIND: SchemaKind;
}

/// Additionally implemented by RPC-kind schemas to name their response type.
/// The response schema's own `KIND` must be `SchemaKind::Event` — RPC replies
/// are not themselves request/response shaped.
pub trait RpcSchema: MessageSchema {
    type Response: MessageSchema;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaId(TypeId);

impl SchemaId {
    pub fn of<M: MessageSchema>() -> Self {
        SchemaId(TypeId::of::<M>())
    }
}

#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    pub type_name: &'static str,
    pub kind: SchemaKind,
    pub opts: SchemaOpts,
}

/// The side table. One instance lives on the router, shared via `Arc`.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entries: DashMap<SchemaId, SchemaDescriptor>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure<M: MessageSchema>(&self) -> SchemaId {
        let id = SchemaId::of::<M>();
        self.entries.entry(id).or_insert_with(|| SchemaDescriptor {
            type_name: M::TYPE,
            kind: M::KIND,
            opts: SchemaOpts::default(),
        });
        id
    }

    /// The only sanctioned accessors, per the design notes: callers never
    /// reach into `entries` directly, even from within this crate.
    pub fn get_descriptor<M: MessageSchema>(&self) -> SchemaDescriptor {
        let id = self.ensure::<M>();
        self.entries.get(&id).unwrap().clone()
    }

    pub fn get_kind<M: MessageSchema>(&self) -> SchemaKind {
        M::KIND
    }

    pub fn type_of<M: MessageSchema>(&self) -> &'static str {
        M::TYPE
    }

    pub fn get_schema_opts<M: MessageSchema>(&self) -> SchemaOpts {
        let id = self.ensure::<M>();
        self.entries.get(&id).unwrap().opts.clone()
    }

    pub fn set_schema_opts<M: MessageSchema>(&self, opts: SchemaOpts) {
        let id = self.ensure::<M>();
        self.entries.get_mut(&id).unwrap().opts = opts;
    }

    /// Derived/wrapped schemas (e.g. a validation plugin wrapping a schema in
    /// a stricter variant) must carry the original's options forward rather
    /// than silently resetting to defaults.
    pub fn clone_opts_into<From: MessageSchema, To: MessageSchema>(&self) {
        let opts = self.get_schema_opts::<From>();
        self.set_schema_opts::<To>(opts);
    }

    pub fn by_type_name(&self, type_name: &str) -> Option<SchemaDescriptor> {
        self.entries
            .iter()
            .find(|e| e.value().type_name == type_name)
            .map(|e| e.value().clone())
    }
}
