//! Schema model and JSON-Schema loader.

mod loader;
mod model;

pub use model::{
    CompositeIndex, DefaultKind, DefaultValue, IdKind, PropType, Property, Schema,
};
