//! Modeling strategy: how logical bytes are traversed before they reach the
//! coder. Only stream order exists today; a reordering model becomes a new
//! [`Model`] variant.

use serde::Serialize;

use crate::coder::{CoderState, CoderStatus};
use crate::error::{HcompError, Result};
use crate::storage::Storage;

/// Model tag stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum ModelType {
    Stdio = 0,
}

impl ModelType {
    pub fn name(self) -> &'static str {
        match self {
            ModelType::Stdio => "stdio",
        }
    }
}

impl TryFrom<u16> for ModelType {
    type Error = HcompError;

    fn try_from(tag: u16) -> Result<Self> {
        match tag {
            0 => Ok(ModelType::Stdio),
            other => Err(HcompError::UnknownModel(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// Bytes pass through unchanged, in stream order.
    Stdio,
}

impl Model {
    pub fn new(model: ModelType) -> Result<Self> {
        match model {
            ModelType::Stdio => Ok(Model::Stdio),
        }
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            Model::Stdio => ModelType::Stdio,
        }
    }

    pub fn stread(&mut self, coder: &mut CoderState, storage: &mut Storage) -> Result<()> {
        match self {
            Model::Stdio => coder.stread(storage),
        }
    }

    pub fn stwrite(&mut self, coder: &mut CoderState, storage: &mut Storage) -> Result<()> {
        match self {
            Model::Stdio => coder.stwrite(storage),
        }
    }

    pub fn seek(&mut self, coder: &mut CoderState, pos: u64) -> Result<()> {
        match self {
            Model::Stdio => coder.seek(pos),
        }
    }

    pub fn read(
        &mut self,
        coder: &mut CoderState,
        storage: &mut Storage,
        pos: u64,
        len: usize,
    ) -> Result<Vec<u8>> {
        match self {
            Model::Stdio => coder.read(storage, pos, len),
        }
    }

    pub fn write(
        &mut self,
        coder: &mut CoderState,
        storage: &mut Storage,
        pos: u64,
        data: &[u8],
    ) -> Result<usize> {
        match self {
            Model::Stdio => coder.write(storage, pos, data),
        }
    }

    pub fn end_access(&mut self, coder: &mut CoderState, storage: &mut Storage) -> Result<()> {
        match self {
            Model::Stdio => coder.end_access(storage),
        }
    }

    pub fn inquire(&self, coder: &CoderState) -> CoderStatus {
        match self {
            Model::Stdio => coder.inquire(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_tags() {
        assert_eq!(ModelType::try_from(0).unwrap(), ModelType::Stdio);
        assert!(matches!(ModelType::try_from(1), Err(HcompError::UnknownModel(1))));
        assert_eq!(Model::new(ModelType::Stdio).unwrap().model_type(), ModelType::Stdio);
        assert_eq!(ModelType::Stdio.name(), "stdio");
    }
}
