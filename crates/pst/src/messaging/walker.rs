//! Depth-first traversal of the folder hierarchy, yielding every message below a root folder.

use std::{collections::HashSet, fmt, vec};
use tracing::{debug, warn};

use super::{folder::Folder, message::Message, *};
use crate::PstFile;

#[derive(Clone, Copy, Debug)]
pub struct WalkOptions {
    /// Folders nested deeper than this below the root are reported and skipped.
    pub max_depth: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

/// Display names of the folders between the root (exclusive) and a folder.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct FolderPath(Vec<String>);

impl FolderPath {
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut components = self.0.clone();
        components.push(name.into());
        Self(components)
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// A folder or message skipped during the walk.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub node: NodeId,
    pub path: FolderPath,
    pub class: ErrorClass,
    pub message: String,
}

enum Frame {
    Folder {
        node: NodeId,
        parent: FolderPath,
        depth: usize,
    },
    Messages {
        path: FolderPath,
        messages: vec::IntoIter<NodeId>,
    },
}

/// Yields `(path, message)` for each message, visiting a folder's sub-folders before its own
/// messages. Failures are recorded in [Walker::diagnostics] and the walk moves on.
pub struct Walker<'a> {
    pst: &'a PstFile,
    options: WalkOptions,
    stack: Vec<Frame>,
    visited: HashSet<NodeId>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Walker<'a> {
    pub fn new(pst: &'a PstFile, root: NodeId, options: WalkOptions) -> Self {
        Self {
            pst,
            options,
            stack: vec![Frame::Folder {
                node: root,
                parent: FolderPath::default(),
                depth: 0,
            }],
            visited: HashSet::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    fn record(&mut self, node: NodeId, path: &FolderPath, err: MessagingError) {
        warn!(?node, path = %path, class = ?err.class(), %err, "skipping node");
        self.diagnostics.push(Diagnostic {
            node,
            path: path.clone(),
            class: err.class(),
            message: err.to_string(),
        });
    }

    /// Read a folder's hierarchy table, then its contents table. Its messages are pushed below
    /// its sub-folders, so the first sub-folder is visited next.
    fn enter_folder(&mut self, node: NodeId, parent: FolderPath, depth: usize) {
        if depth > self.options.max_depth {
            self.record(
                node,
                &parent,
                MessagingError::DepthLimitExceeded(self.options.max_depth),
            );
            return;
        }

        if !self.visited.insert(node) {
            self.record(node, &parent, MessagingError::FolderCycle(node));
            return;
        }

        let folder = match Folder::read(self.pst, node) {
            Ok(folder) => folder,
            Err(err) => {
                self.record(node, &parent, err);
                return;
            }
        };

        let path = if depth == 0 {
            parent
        } else {
            match folder.display_name() {
                Ok(name) => parent.child(name),
                Err(err) => {
                    self.record(node, &parent, err);
                    parent.child(format!("{:#x}", u32::from(node)))
                }
            }
        };
        debug!(?node, path = %path, depth, "entering folder");

        let sub_folders = folder.sub_folders().unwrap_or_else(|err| {
            self.record(node, &path, err);
            vec![]
        });
        let messages = folder.messages().unwrap_or_else(|err| {
            self.record(node, &path, err);
            vec![]
        });

        if !messages.is_empty() {
            self.stack.push(Frame::Messages {
                path: path.clone(),
                messages: messages.into_iter(),
            });
        }

        for sub_folder in sub_folders.into_iter().rev() {
            match sub_folder.id_type() {
                Ok(NodeIdType::NormalFolder) => self.stack.push(Frame::Folder {
                    node: sub_folder,
                    parent: path.clone(),
                    depth: depth + 1,
                }),
                Ok(NodeIdType::SearchFolder) => {
                    debug!(node = ?sub_folder, path = %path, "skipping search folder");
                }
                _ => self.record(
                    sub_folder,
                    &path,
                    MessagingError::UnexpectedNodeType(sub_folder, NodeIdType::NormalFolder),
                ),
            }
        }
    }
}

impl<'a> Iterator for Walker<'a> {
    type Item = (FolderPath, Message<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::Folder {
                    node,
                    parent,
                    depth,
                } => self.enter_folder(node, parent, depth),
                Frame::Messages { path, mut messages } => {
                    let Some(node) = messages.next() else {
                        continue;
                    };
                    let result = Message::read(self.pst, node);
                    self.stack.push(Frame::Messages {
                        path: path.clone(),
                        messages,
                    });
                    match result {
                        Ok(message) => return Some((path, message)),
                        Err(err) => self.record(node, &path, err),
                    }
                }
            }
        }

        None
    }
}
