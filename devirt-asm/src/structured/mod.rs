mod assembly;
mod context;
mod methods;
mod types;

pub use assembly::{Assembly, AssemblyLoadingError, AssemblyName};
pub use context::Context;
pub use methods::Method;
pub use types::{Class, Field, Interface, Primitive, Type};
