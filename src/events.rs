/// Observer hooks for a player session, registered once at spawn time.
///
/// `on_stream_updated` fires every time the session starts, restarts, or
/// resets its stream; `on_killed` fires exactly once, right before the
/// session task exits.
#[derive(Default)]
pub struct EventHooks {
    pub on_stream_updated: Option<Box<dyn Fn() + Send>>,
    pub on_killed: Option<Box<dyn Fn() + Send>>,
}

impl EventHooks {
    pub(crate) fn stream_updated(&self) {
        if let Some(hook) = &self.on_stream_updated {
            hook();
        }
    }

    pub(crate) fn killed(&self) {
        if let Some(hook) = &self.on_killed {
            hook();
        }
    }
}
