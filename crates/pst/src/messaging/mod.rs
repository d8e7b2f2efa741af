//! ## [Messaging Layer](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/3f1bc553-d15d-4dcf-9b80-fbf1dd6c7e79)

use std::{io, string::FromUtf8Error};
use thiserror::Error;

use crate::{
    ltp::{prop_type::PropertyType, LtpError},
    ndb::{
        node_id::{NodeId, NodeIdType},
        NdbError,
    },
    ErrorClass,
};

pub mod folder;
pub mod message;
pub mod record;
pub mod store;
pub mod walker;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Node Database error: {0}")]
    NodeDatabaseError(#[from] NdbError),
    #[error("Lists, Tables, and Properties error: {0}")]
    ListsTablesPropertiesError(#[from] LtpError),
    #[error("Expected a {1:?} node: {0:?}")]
    UnexpectedNodeType(NodeId, NodeIdType),
    #[error("Invalid PidTagDisplayName on store: {0:?}")]
    InvalidStoreDisplayName(PropertyType),
    #[error("Invalid PidTagDisplayName on folder: {0:?}")]
    InvalidFolderDisplayName(PropertyType),
    #[error("Invalid PidTagContentCount on folder: {0:?}")]
    InvalidFolderContentCount(PropertyType),
    #[error("Invalid PidTagSubfolders on folder: {0:?}")]
    InvalidFolderHasSubfolders(PropertyType),
    #[error("Invalid PidTagMessageClass on message: {0:?}")]
    InvalidMessageClass(PropertyType),
    #[error("Invalid time property 0x{0:04X}: {1:?}")]
    InvalidTimeProperty(u16, PropertyType),
    #[error("Invalid PidTagHtml on message: {0:?}")]
    InvalidHtmlBodyType(PropertyType),
    #[error("PidTagHtml is not valid UTF-8: {0}")]
    InvalidHtmlBody(#[from] FromUtf8Error),
    #[error("Folder nesting exceeds {0} levels")]
    DepthLimitExceeded(usize),
    #[error("Folder hierarchy cycle at {0:?}")]
    FolderCycle(NodeId),
}

impl MessagingError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NodeDatabaseError(err) => err.class(),
            Self::ListsTablesPropertiesError(err) => err.class(),
            Self::UnexpectedNodeType(..)
            | Self::DepthLimitExceeded(_)
            | Self::FolderCycle(_) => ErrorClass::CorruptIndex,
            Self::InvalidHtmlBody(_) => ErrorClass::Encoding,
            Self::InvalidStoreDisplayName(_)
            | Self::InvalidFolderDisplayName(_)
            | Self::InvalidFolderContentCount(_)
            | Self::InvalidFolderHasSubfolders(_)
            | Self::InvalidMessageClass(_)
            | Self::InvalidTimeProperty(..)
            | Self::InvalidHtmlBodyType(_) => ErrorClass::CorruptNode,
        }
    }
}

impl From<MessagingError> for io::Error {
    fn from(err: MessagingError) -> io::Error {
        match err {
            MessagingError::NodeDatabaseError(err) => err.into(),
            err => io::Error::new(io::ErrorKind::InvalidData, err),
        }
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;

/// Check that `node` has the NID type the caller is about to dereference it as.
pub(crate) fn expect_node_type(node: NodeId, expected: &[NodeIdType]) -> MessagingResult<()> {
    match node.id_type() {
        Ok(id_type) if expected.contains(&id_type) => Ok(()),
        _ => Err(MessagingError::UnexpectedNodeType(node, expected[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            MessagingError::DepthLimitExceeded(64).class(),
            ErrorClass::CorruptIndex
        );
        assert_eq!(
            MessagingError::FolderCycle(NodeId::from(0x122)).class(),
            ErrorClass::CorruptIndex
        );
        assert_eq!(
            MessagingError::from(LtpError::PropertyNotFound(0x0037)).class(),
            ErrorClass::PropertyNotFound
        );
        assert_eq!(
            MessagingError::from(LtpError::NodeDatabaseError(NdbError::InvalidBlockCrc(0)))
                .class(),
            ErrorClass::ChecksumMismatch
        );
        let invalid = String::from_utf8(vec![0xC3]).unwrap_err();
        assert_eq!(
            MessagingError::from(invalid).class(),
            ErrorClass::Encoding
        );
    }

    #[test]
    fn test_expect_node_type() {
        assert!(expect_node_type(NodeId::from(0x122), &[NodeIdType::NormalFolder]).is_ok());
        let Err(MessagingError::UnexpectedNodeType(_, NodeIdType::NormalMessage)) =
            expect_node_type(NodeId::from(0x122), &[NodeIdType::NormalMessage])
        else {
            panic!("0x122 is a folder");
        };
    }
}
