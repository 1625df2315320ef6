//! Class metadata.
//!
//! Only the slice of class information the execution bridge touches: the
//! mirror object (monitor target of static synchronized methods) and
//! whether the class is unconditionally rooted, which lets the frame
//! scanner skip reporting it.

use std::sync::Arc;

use crate::value::ObjRef;

/// Index of a class in the [`ClassTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ClassId(pub u32);

/// Per-class metadata.
#[derive(Debug)]
pub struct ClassBlock {
    name: Arc<str>,
    /// Preloaded/ROM classes are roots on their own; frames holding their
    /// methods do not have to report them for class-unloading safety.
    rooted: bool,
    /// The class instance; monitor object for static synchronized methods.
    mirror: ObjRef,
}

impl ClassBlock {
    pub fn new(name: impl Into<Arc<str>>, mirror: ObjRef) -> Self {
        Self {
            name: name.into(),
            rooted: false,
            mirror,
        }
    }

    pub fn rooted(mut self) -> Self {
        self.rooted = true;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_rooted(&self) -> bool {
        self.rooted
    }

    #[inline]
    pub fn mirror(&self) -> ObjRef {
        self.mirror
    }
}

/// Append-only registry of classes, frozen before execution starts.
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: Vec<ClassBlock>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, class: ClassBlock) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(class);
        id
    }

    #[inline]
    pub fn get(&self, id: ClassId) -> &ClassBlock {
        &self.classes[id.0 as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
