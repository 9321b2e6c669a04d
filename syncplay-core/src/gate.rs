//! Sink Gate
//!
//! Wraps a display or position sink shared between the controller and a
//! background thread. Closing takes the same lock as every call, so a call
//! already in flight finishes first and every later call is a no-op.

use parking_lot::Mutex;

pub struct SinkGate<S> {
    inner: Mutex<Option<S>>,
}

impl<S> SinkGate<S> {
    pub fn new(sink: S) -> Self {
        Self {
            inner: Mutex::new(Some(sink)),
        }
    }

    /// Run `f` against the sink. `None` once the gate is closed.
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        self.inner.lock().as_mut().map(f)
    }

    /// Close the gate and hand the sink back
    pub fn close(&self) -> Option<S> {
        self.inner.lock().take()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calls_until_closed() {
        let gate = SinkGate::new(Vec::new());
        assert_eq!(gate.with(|v| v.push(1)), Some(()));
        assert_eq!(gate.with(|v| v.len()), Some(1));

        assert_eq!(gate.close(), Some(vec![1]));
        assert!(gate.is_closed());
        assert_eq!(gate.with(|v| v.push(2)), None);
        assert_eq!(gate.close(), None);
    }
}
