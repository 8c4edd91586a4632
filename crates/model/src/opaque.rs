use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A provider-specific message the kernel stores but never inspects.
///
/// Some providers need the exact shape of an earlier assistant message to
/// accept the follow-up request. The classic example is an assistant turn
/// that requested tool calls (including `transfer_to_*` handoff calls): the
/// tool results sent later must reference the call ids from that turn.
/// Providers wrap their own message type in an `OpaqueMessage`, the kernel
/// keeps it in the run's context, and the provider unwraps it again when it
/// serializes the next request.
pub struct OpaqueMessage(Arc<dyn OpaqueMessageObject>);

impl OpaqueMessage {
    /// Creates a new `OpaqueMessage`.
    ///
    /// The `id` must be unique within one run; equality and hashing only
    /// look at it.
    #[inline]
    pub fn new<ID: Into<String>, T: Send + Sync + 'static>(
        id: ID,
        value: T,
    ) -> Self {
        let id = id.into();
        Self(Arc::new(OpaqueMessageInner { id, value }))
    }

    /// Returns the identifier of this message.
    #[inline]
    pub fn id(&self) -> &str {
        self.0.id()
    }

    /// Borrows the wrapped value if it has type `T`.
    #[inline]
    pub fn to_raw<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }
}

impl Clone for OpaqueMessage {
    #[inline]
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl Debug for OpaqueMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OpaqueMessage").field(&self.id()).finish()
    }
}

impl PartialEq for OpaqueMessage {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for OpaqueMessage {}

impl Hash for OpaqueMessage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

trait OpaqueMessageObject: Send + Sync {
    fn id(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

struct OpaqueMessageInner<T> {
    id: String,
    value: T,
}

impl<T: Send + Sync + 'static> OpaqueMessageObject for OpaqueMessageInner<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn as_any(&self) -> &dyn Any {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct ProviderTurn {
        tool_call_ids: Vec<String>,
    }

    #[test]
    fn test_unwrap_provider_turn() {
        let turn = ProviderTurn {
            tool_call_ids: vec!["call_1".to_owned()],
        };
        let opaque = OpaqueMessage::new("chatcmpl-1", turn);
        assert_eq!(opaque.id(), "chatcmpl-1");

        let raw = opaque.to_raw::<ProviderTurn>().unwrap();
        assert_eq!(raw.tool_call_ids, ["call_1"]);
        assert!(opaque.to_raw::<String>().is_none());
    }

    #[test]
    fn test_identity_is_the_id() {
        let first = OpaqueMessage::new("chatcmpl-1", 1_u8);
        let same_id = OpaqueMessage::new("chatcmpl-1", 2_u8);
        let other = OpaqueMessage::new("chatcmpl-2", 1_u8);

        assert_eq!(first, same_id);
        assert_ne!(first, other);

        let set: HashSet<_> = [first.clone(), same_id, other].into();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&first));
    }
}
