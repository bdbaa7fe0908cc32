//! Operation records assembled from request messages.

use crate::document::DocumentField;
use crate::header::MessageHeader;
use serde::Serialize;
use std::fmt;

/// Operation kinds the parser assembles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Update,
    Insert,
    Query,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Update => "update",
            OperationKind::Insert => "insert",
            OperationKind::Query => "query",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OP_UPDATE body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOperation {
    pub full_collection_name: String,
    pub flags: u32,
    pub selector: Option<DocumentField>,
    pub update: Option<DocumentField>,
}

/// OP_INSERT body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertOperation {
    pub flags: u32,
    pub full_collection_name: String,
    /// Successfully decoded documents, in wire order.
    pub documents: Vec<bson::Document>,
    /// Complete document slices the decoder rejected.
    #[serde(skip_serializing_if = "is_zero")]
    pub malformed: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// OP_QUERY body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOperation {
    pub flags: u32,
    pub full_collection_name: String,
    pub number_to_skip: u32,
    /// Batch size hint; negative values are meaningful to the server.
    pub number_to_return: i32,
    pub query: Option<DocumentField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_fields_selector: Option<DocumentField>,
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Operation {
    Update(UpdateOperation),
    Insert(InsertOperation),
    Query(QueryOperation),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Update(_) => OperationKind::Update,
            Operation::Insert(_) => OperationKind::Insert,
            Operation::Query(_) => OperationKind::Query,
        }
    }

    pub fn full_collection_name(&self) -> &str {
        match self {
            Operation::Update(op) => &op.full_collection_name,
            Operation::Insert(op) => &op.full_collection_name,
            Operation::Query(op) => &op.full_collection_name,
        }
    }

    /// Dotted counter name: `<kind>.<fullCollectionName>`.
    pub fn metric_name(&self) -> String {
        format!("{}.{}", self.kind(), self.full_collection_name())
    }

    /// Splits the collection name into database and collection.
    pub fn namespace(&self) -> Namespace<'_> {
        Namespace::parse(self.full_collection_name())
    }
}

/// `"db.collection"` split on its first dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Namespace<'a> {
    pub database: &'a str,
    /// Empty when the name has no dot.
    pub collection: &'a str,
}

impl<'a> Namespace<'a> {
    pub fn parse(full_name: &'a str) -> Self {
        match full_name.split_once('.') {
            Some((database, collection)) => Self {
                database,
                collection,
            },
            None => Self {
                database: full_name,
                collection: "",
            },
        }
    }

    /// Whether this is a `$cmd` pseudo-collection used for commands.
    pub fn is_command(&self) -> bool {
        self.collection == "$cmd"
    }
}

/// Result of parsing one buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// A recognized request, possibly with absent document fields.
    Operation {
        header: MessageHeader,
        operation: Operation,
    },
    /// The opcode is not one the parser assembles; nothing past the header
    /// was read.
    Unhandled { header: MessageHeader },
}

impl ParseOutcome {
    pub fn header(&self) -> &MessageHeader {
        match self {
            ParseOutcome::Operation { header, .. } => header,
            ParseOutcome::Unhandled { header } => header,
        }
    }

    pub fn operation(&self) -> Option<&Operation> {
        match self {
            ParseOutcome::Operation { operation, .. } => Some(operation),
            ParseOutcome::Unhandled { .. } => None,
        }
    }

    pub fn into_operation(self) -> Option<Operation> {
        match self {
            ParseOutcome::Operation { operation, .. } => Some(operation),
            ParseOutcome::Unhandled { .. } => None,
        }
    }
}
