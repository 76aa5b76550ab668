use tokio_util::sync::CancellationToken;

/// One cancellable in-flight request slot (audio, video, up, manifest).
///
/// Tokens derive from an owner-level [`CancellationToken`], so closing the
/// owner aborts every slot at once. Aborting a token cancels the body read
/// of whatever request currently holds it; the request future resolves to
/// the aborted sentinel instead of an error.
#[derive(Clone, Debug)]
pub struct RequestToken {
    cancel: CancellationToken,
}

impl RequestToken {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            cancel: parent.child_token(),
        }
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_observable() {
        let parent = CancellationToken::new();
        let token = RequestToken::new(&parent);
        assert!(!token.is_aborted());
        token.abort();
        assert!(token.is_aborted());
    }

    #[test]
    fn parent_cancels_children() {
        let parent = CancellationToken::new();
        let audio = RequestToken::new(&parent);
        let video = RequestToken::new(&parent);
        parent.cancel();
        assert!(audio.is_aborted());
        assert!(video.is_aborted());
    }

    #[test]
    fn sibling_aborts_are_independent() {
        let parent = CancellationToken::new();
        let up = RequestToken::new(&parent);
        let video = RequestToken::new(&parent);
        up.abort();
        assert!(up.is_aborted());
        assert!(!video.is_aborted());
    }
}
