//! ## [Message Objects](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/1042af37-aaa4-4edc-bffd-90a1ede24188)

use chrono::{DateTime, Utc};
use tracing::debug;

use super::*;
use crate::{
    ltp::{
        prop_context::{filetime_to_utc, PropertyContext, PropertyValue},
        table_context::TableContext,
    },
    ndb::{node_id::NID_ATTACHMENT_TABLE, NodeRecord},
    PstFile,
};

/// `PidTagMessageClass`
pub const PROP_MESSAGE_CLASS: u16 = 0x001A;
/// `PidTagSubject`
pub const PROP_SUBJECT: u16 = 0x0037;
/// `PidTagClientSubmitTime`
pub const PROP_CLIENT_SUBMIT_TIME: u16 = 0x0039;
/// `PidTagTransportMessageHeaders`
pub const PROP_TRANSPORT_HEADERS: u16 = 0x007D;
/// `PidTagSenderName`
pub const PROP_SENDER_NAME: u16 = 0x0C1A;
/// `PidTagMessageDeliveryTime`
pub const PROP_DELIVERY_TIME: u16 = 0x0E06;
/// `PidTagBody`
pub const PROP_BODY: u16 = 0x1000;
/// `PidTagHtml`
pub const PROP_HTML: u16 = 0x1013;
/// `PidTagCreationTime`
pub const PROP_CREATION_TIME: u16 = 0x3007;
/// `PidTagInternetCodepage`
pub const PROP_INTERNET_CODEPAGE: u16 = 0x3FDE;
/// `PidTagMessageCodepage`
pub const PROP_MESSAGE_CODEPAGE: u16 = 0x3FFD;

/// Windows-1252, used when a message declares no code page.
pub const DEFAULT_CODE_PAGE: u16 = 1252;

pub struct Message<'a> {
    pst: &'a PstFile,
    node: NodeRecord,
    properties: PropertyContext<'a>,
}

impl<'a> Message<'a> {
    pub fn read(pst: &'a PstFile, node_id: NodeId) -> MessagingResult<Self> {
        expect_node_type(
            node_id,
            &[NodeIdType::NormalMessage, NodeIdType::AssociatedMessage],
        )?;
        let node = pst.lookup_node(node_id)?;
        let properties = PropertyContext::read(pst, node)?;
        Ok(Self {
            pst,
            node,
            properties,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node.node()
    }

    pub fn properties(&self) -> &PropertyContext<'a> {
        &self.properties
    }

    /// The code page for `PtypString8` values: `PidTagMessageCodepage`, then
    /// `PidTagInternetCodepage`, then Windows-1252.
    pub fn code_page(&self) -> u16 {
        [PROP_MESSAGE_CODEPAGE, PROP_INTERNET_CODEPAGE]
            .into_iter()
            .find_map(|prop_id| match self.properties.get(prop_id) {
                Ok(PropertyValue::Integer32(code_page)) => u16::try_from(code_page).ok(),
                _ => None,
            })
            .unwrap_or(DEFAULT_CODE_PAGE)
    }

    /// Read a string property, decoding `PtypString8` with [Message::code_page].
    pub fn text(&self, prop_id: u16) -> MessagingResult<String> {
        let value = self.properties.get(prop_id)?;
        let code_page = match value {
            PropertyValue::String8(_) => self.code_page(),
            _ => DEFAULT_CODE_PAGE,
        };
        Ok(value.to_text(code_page)?)
    }

    pub fn message_class(&self) -> MessagingResult<String> {
        match self.properties.get(PROP_MESSAGE_CLASS)? {
            value @ (PropertyValue::String8(_) | PropertyValue::Unicode(_)) => {
                Ok(value.to_text(self.code_page())?)
            }
            invalid => Err(MessagingError::InvalidMessageClass(invalid.prop_type())),
        }
    }

    /// Read a `PtypTime` property. Ticks outside of the representable range yield `None`.
    pub fn time(&self, prop_id: u16) -> MessagingResult<Option<DateTime<Utc>>> {
        match self.properties.get(prop_id)? {
            PropertyValue::Time(ticks) => Ok(filetime_to_utc(ticks)),
            invalid => Err(MessagingError::InvalidTimeProperty(
                prop_id,
                invalid.prop_type(),
            )),
        }
    }

    /// `PidTagHtml` is stored as either a binary or a string. Binary content must be UTF-8.
    pub fn html_body(&self) -> MessagingResult<String> {
        match self.properties.get(PROP_HTML)? {
            PropertyValue::Binary(data) => Ok(String::from_utf8(data)?),
            value @ (PropertyValue::String8(_) | PropertyValue::Unicode(_)) => {
                Ok(value.to_text(self.code_page())?)
            }
            invalid => Err(MessagingError::InvalidHtmlBodyType(invalid.prop_type())),
        }
    }

    /// The attachment table subnode, if the message has one.
    pub fn attachment_table(&self) -> MessagingResult<Option<TableContext<'a>>> {
        let Some(node) = self.pst.read_sub_nodes(&self.node)?.remove(&NID_ATTACHMENT_TABLE)
        else {
            debug!(message = ?self.node_id(), "message has no attachment table");
            return Ok(None);
        };
        Ok(Some(TableContext::read(self.pst, node)?))
    }

    pub fn attachment_count(&self) -> MessagingResult<usize> {
        Ok(self
            .attachment_table()?
            .map(|table| table.row_count())
            .unwrap_or_default())
    }
}
