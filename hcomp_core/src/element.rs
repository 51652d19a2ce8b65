//! Per-element metadata shared by every open handle on the element.

use std::cell::RefCell;
use std::rc::Rc;

use crate::coder::CoderState;
use crate::model::Model;
use crate::storage::DirEntry;
use crate::tag::Ref;

/// Resident state of one compressed element.
#[derive(Debug)]
pub struct ElementInfo {
    /// Logical (uncompressed) length.
    pub length: u32,
    pub comp_ref: Ref,
    pub model: Model,
    pub coder: CoderState,
    /// Directory entry of the serialized header.
    pub header: DirEntry,
}

pub type SharedInfo = Rc<RefCell<ElementInfo>>;

impl ElementInfo {
    pub fn new(length: u32, comp_ref: Ref, model: Model, coder: CoderState, header: DirEntry) -> Self {
        Self {
            length,
            comp_ref,
            model,
            coder,
            header,
        }
    }

    pub fn shared(self) -> SharedInfo {
        Rc::new(RefCell::new(self))
    }
}
