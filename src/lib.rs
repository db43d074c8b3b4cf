// ViewForge
// Bridge between a scripting runtime producing UI descriptions and a native
// view tree: decodes compact binary view-tree mutation descriptors into
// typed render requests and sequences their application per UI context.
//
// The platform view systems, layout engine and asset pipeline are external
// collaborators; this crate only decodes, stores, sequences and hands off
// render instructions.

pub mod decoder;
pub mod error;
pub mod queue;
pub mod request;
pub mod value;

// Re-export commonly used types
pub use decoder::{DescriptorDecoder, EmptyStyleTable, StringCache, StyleTable, WireTag};
pub use error::{DecodeError, DecodeResult};
pub use queue::{
    ContextRenderQueue, RenderHandler, TaskPump, ThreadAffinity, UpdateId, INVALID_UPDATE_ID,
};
pub use request::{
    AnimationCurve, AnimationOptions, AttributeNameTable, AttributeValue, ContextId, ElementId,
    Entry, EntryLog, EntryVisitor, NumericAttributeNames, RenderRequest,
};
pub use value::{AttachedValueSource, AttachedValueTable, CallbackHandle, HostValue};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> String {
    format!("viewforge v{VERSION}")
}
