//! Schema-driven low-code renderer.
//!
//! A [`RenderRoot`] turns a [`SchemaNode`] tree into a [`VNode`] tree: props
//! are resolved through the expression [`parser`], `condition`/`loop`/`state`
//! expand the tree, leaf components are wrapped per design mode, and the
//! result is committed to a [`MountTree`] whose instances are reported back
//! to the host document.

pub mod component;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod host;
pub mod i18n;
pub mod leaf;
pub mod mount;
pub mod node_renderer;
pub mod parser;
pub mod renderers;
pub mod rerender;
pub mod root;
pub mod schema;
pub mod scope;
pub mod value;
pub mod vnode;

pub use component::{BuiltinRenderer, Component, ComponentId, ComponentKind, ComponentRegistry, LeafMode};
pub use context::{DesignMode, DisableCompMock, GetNode, OnCompGetCtx, RendererContext};
pub use engine::{Scheduler, SystemClock, TestClock};
pub use error::{DocumentError, ExpressionError, RenderError};
pub use host::{DocumentHost, MemoryDocument, NodeHandle, NodeModel};
pub use i18n::Messages;
pub use leaf::Generation;
pub use mount::{InstanceHandle, MountTree};
pub use parser::{Diagnostic, SchemaParser, SchemaParserOptions};
pub use root::{RenderRoot, RendererProps};
pub use schema::SchemaNode;
pub use scope::RuntimeScope;
pub use value::{Object, Value};
pub use vnode::VNode;
