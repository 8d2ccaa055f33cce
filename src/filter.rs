use crate::aggregator::ResponseSet;
use crate::command::Response;
use crate::transport::Address;

/// Controls early completion of a synchronous invocation.
pub trait ResponseFilter: Send + Sync {
    /// Called on every new reply. Returning `false` fails the invocation at once.
    fn is_acceptable(&self, from: &Address, response: &Response) -> bool;

    /// Called after each accepted reply. Returning `true` completes the
    /// invocation without waiting on the remaining members.
    fn enough(&self, responses: &ResponseSet) -> bool;
}

/// Completes once `required` members acknowledged successfully.
#[derive(Debug, Clone, Copy)]
pub struct AckCount {
    required: usize,
}

impl AckCount {
    pub fn new(required: usize) -> Self {
        AckCount { required }
    }
}

impl ResponseFilter for AckCount {
    fn is_acceptable(&self, _from: &Address, _response: &Response) -> bool {
        true
    }

    fn enough(&self, responses: &ResponseSet) -> bool {
        responses.successful() >= self.required
    }
}

/// Vetoes the invocation as soon as any member replies with an exception.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuccessfulResponses;

impl ResponseFilter for SuccessfulResponses {
    fn is_acceptable(&self, _from: &Address, response: &Response) -> bool {
        !matches!(response, Response::Exception(_))
    }

    fn enough(&self, _responses: &ResponseSet) -> bool {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ack_count() {
        let a = Address::from("a");
        let b = Address::from("b");
        let mut set = ResponseSet::expecting([a.clone(), b.clone()]);
        let filter = AckCount::new(1);
        assert!(!filter.enough(&set));

        set.record(b, Response::Exception("boom".to_string()));
        assert!(!filter.enough(&set));

        set.record(a, Response::Success(None));
        assert!(filter.enough(&set));
    }

    #[test]
    fn exceptions_are_vetoed() {
        let from = Address::from("a");
        assert!(SuccessfulResponses.is_acceptable(&from, &Response::Success(None)));
        let boom = Response::Exception("boom".to_string());
        assert!(!SuccessfulResponses.is_acceptable(&from, &boom));
    }
}
