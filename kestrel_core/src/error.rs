//! VM exceptions.
//!
//! The bridge never aborts on a recoverable failure: resource exhaustion and
//! dispatch-time linkage errors become a pending `VmException` on the
//! execution environment, surfaced to the caller as an EXCEPTION result and
//! unwound by the interpreter. Internal result codes never leak outward.

use thiserror::Error;

use crate::value::ObjRef;

/// The standard-language errors this layer synthesizes or propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExceptionKind {
    #[error("java.lang.AbstractMethodError")]
    AbstractMethod,
    #[error("java.lang.IllegalAccessError")]
    IllegalAccess,
    #[error("java.lang.IncompatibleClassChangeError")]
    IncompatibleClassChange,
    #[error("java.lang.UnsatisfiedLinkError")]
    UnsatisfiedLink,
    #[error("java.lang.OutOfMemoryError")]
    OutOfMemory,
    #[error("java.lang.StackOverflowError")]
    StackOverflow,
    #[error("java.lang.InternalError")]
    Internal,
}

/// A pending exception: kind, detail message, and the thrown object once
/// one has been materialized by the object layer (null until then).
#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct VmException {
    pub kind: ExceptionKind,
    pub detail: String,
    pub object: ObjRef,
}

impl VmException {
    pub fn new(kind: ExceptionKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            object: ObjRef::NULL,
        }
    }

    pub fn with_object(mut self, object: ObjRef) -> Self {
        self.object = object;
        self
    }

    pub fn abstract_method(what: impl Into<String>) -> Self {
        Self::new(ExceptionKind::AbstractMethod, what)
    }

    pub fn illegal_access(what: impl Into<String>) -> Self {
        Self::new(ExceptionKind::IllegalAccess, what)
    }

    pub fn unsatisfied_link(what: impl Into<String>) -> Self {
        Self::new(ExceptionKind::UnsatisfiedLink, what)
    }

    pub fn out_of_memory(what: impl Into<String>) -> Self {
        Self::new(ExceptionKind::OutOfMemory, what)
    }

    pub fn stack_overflow(what: impl Into<String>) -> Self {
        Self::new(ExceptionKind::StackOverflow, what)
    }

    pub fn internal(what: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Internal, what)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_display() {
        let e = VmException::abstract_method("app/Main.run");
        assert_eq!(
            e.to_string(),
            "java.lang.AbstractMethodError: app/Main.run"
        );
    }

    #[test]
    fn test_exception_object_defaults_null() {
        let e = VmException::out_of_memory("frame push");
        assert!(e.object.is_null());
        let obj = ObjRef::from_raw(0x99);
        assert_eq!(e.with_object(obj).object, obj);
    }
}
