//! ## [Message Store](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/aa0539bd-e7bf-4cec-8bde-0b87c2a86baf)

use super::{folder::PROP_DISPLAY_NAME, *};
use crate::{
    ltp::prop_context::{PropertyContext, PropertyValue},
    ndb::node_id::NID_MESSAGE_STORE,
    PstFile,
};

pub struct Store<'a> {
    properties: PropertyContext<'a>,
}

impl<'a> Store<'a> {
    pub fn read(pst: &'a PstFile) -> MessagingResult<Self> {
        let node = pst.lookup_node(NID_MESSAGE_STORE)?;
        let properties = PropertyContext::read(pst, node)?;
        Ok(Self { properties })
    }

    pub fn properties(&self) -> &PropertyContext<'a> {
        &self.properties
    }

    pub fn display_name(&self) -> MessagingResult<String> {
        match self.properties.get(PROP_DISPLAY_NAME)? {
            value @ (PropertyValue::String8(_) | PropertyValue::Unicode(_)) => {
                Ok(value.to_text(1252)?)
            }
            invalid => Err(MessagingError::InvalidStoreDisplayName(invalid.prop_type())),
        }
    }
}
