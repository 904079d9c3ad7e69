use crate::models::{Operation, OperationKind, TransportTag};

/// Decide which transport an operation travels over.
///
/// Total over [`Operation`]: subscriptions go to the stream transport,
/// everything else is a one-shot request.
pub fn classify(op: &Operation) -> TransportTag {
    match op.kind() {
        OperationKind::Subscription => TransportTag::Stream,
        OperationKind::Query | OperationKind::Mutation => TransportTag::Request,
    }
}
