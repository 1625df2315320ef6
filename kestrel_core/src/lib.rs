//! Core types for the Kestrel VM: stack words, method and class metadata,
//! and the VM exception taxonomy shared by the execution tiers.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod class;
pub mod error;
pub mod method;
pub mod value;

pub use class::{ClassBlock, ClassId, ClassTable};
pub use error::{ExceptionKind, VmException};
pub use method::{InvokerKind, MethodBlock, MethodId, MethodTable, ReturnKind};
pub use value::{ObjRef, Slot};
