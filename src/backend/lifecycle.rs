// Session lifecycle - construction order and reverse-order teardown
//
// Each stage depends on every stage before it. Destroying a dependency before its
// dependents is undefined behavior in the driver, so teardown replays the
// construction trace backwards after the device has drained.

use crate::error::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Instance,
    Surface,
    DebugHook,
    Device,
    Swapchain,
    RenderTargets,
    Pipeline,
    CommandPool,
    SyncObjects,
}

impl Stage {
    pub const BUILD_ORDER: [Stage; 9] = [
        Stage::Instance,
        Stage::Surface,
        Stage::DebugHook,
        Stage::Device,
        Stage::Swapchain,
        Stage::RenderTargets,
        Stage::Pipeline,
        Stage::CommandPool,
        Stage::SyncObjects,
    ];

    /// The validation hook is a construction-time option
    pub fn is_optional(self) -> bool {
        matches!(self, Stage::DebugHook)
    }
}

/// Owner of the per-stage resources
pub trait StageResources {
    /// Block until no GPU work of any kind is pending
    fn wait_idle(&mut self) -> Result<(), RenderError>;

    fn release(&mut self, stage: Stage);
}

/// Construction trace of a session
#[derive(Debug, Default)]
pub struct Lifecycle {
    built: Vec<Stage>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly built stage.
    ///
    /// Panics if `stage` is out of order or a required stage was skipped; that is a
    /// programming error, not a runtime condition.
    pub fn record(&mut self, stage: Stage) {
        let next = self
            .remaining()
            .find(|&next| next == stage || !next.is_optional());
        assert!(
            next == Some(stage),
            "stage {stage:?} built out of order (built so far: {:?})",
            self.built
        );
        log::debug!("Lifecycle: built {:?}", stage);
        self.built.push(stage);
    }

    /// Stages after the last one built, in construction order
    fn remaining(&self) -> impl Iterator<Item = Stage> {
        let start = self.built.last().map_or(0, |last| {
            Stage::BUILD_ORDER
                .iter()
                .position(|s| s == last)
                .map_or(Stage::BUILD_ORDER.len(), |i| i + 1)
        });
        Stage::BUILD_ORDER.into_iter().skip(start)
    }

    pub fn built(&self) -> &[Stage] {
        &self.built
    }

    pub fn is_built(&self, stage: Stage) -> bool {
        self.built.contains(&stage)
    }

    /// Every required stage is up
    pub fn is_complete(&self) -> bool {
        Stage::BUILD_ORDER
            .iter()
            .all(|stage| stage.is_optional() || self.built.contains(stage))
    }

    /// Drain the device, then release every built stage in reverse order.
    /// Returns the stages in the order they were released.
    pub fn shutdown<R: StageResources>(&mut self, resources: &mut R) -> Vec<Stage> {
        if self.built.is_empty() {
            return Vec::new();
        }

        if self.is_built(Stage::Device) {
            // Teardown has to happen either way; a lost device is still destroyed
            if let Err(e) = resources.wait_idle() {
                log::warn!("Device did not drain cleanly: {}", e);
            }
        }

        let mut released = Vec::with_capacity(self.built.len());
        while let Some(stage) = self.built.pop() {
            log::debug!("Lifecycle: releasing {:?}", stage);
            resources.release(stage);
            released.push(stage);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        WaitIdle,
        Release(Stage),
    }

    #[derive(Default)]
    struct Trace {
        events: Vec<Event>,
        idle_fails: bool,
    }

    impl StageResources for Trace {
        fn wait_idle(&mut self) -> Result<(), RenderError> {
            self.events.push(Event::WaitIdle);
            if self.idle_fails {
                return Err(RenderError::DeviceLost("test".into()));
            }
            Ok(())
        }

        fn release(&mut self, stage: Stage) {
            self.events.push(Event::Release(stage));
        }
    }

    #[test]
    fn teardown_is_exact_reverse_of_construction() {
        let mut lifecycle = Lifecycle::new();
        for stage in Stage::BUILD_ORDER {
            lifecycle.record(stage);
        }
        assert!(lifecycle.is_complete());

        let construction = lifecycle.built().to_vec();
        let mut trace = Trace::default();
        let released = lifecycle.shutdown(&mut trace);

        let mut expected = construction.clone();
        expected.reverse();
        assert_eq!(released, expected);

        assert_eq!(trace.events[0], Event::WaitIdle);
        let releases: Vec<_> = trace.events[1..]
            .iter()
            .map(|e| match e {
                Event::Release(stage) => *stage,
                Event::WaitIdle => panic!("second idle wait"),
            })
            .collect();
        assert_eq!(
            releases,
            [
                Stage::SyncObjects,
                Stage::CommandPool,
                Stage::Pipeline,
                Stage::RenderTargets,
                Stage::Swapchain,
                Stage::Device,
                Stage::DebugHook,
                Stage::Surface,
                Stage::Instance,
            ]
        );
        assert!(lifecycle.built().is_empty());
    }

    #[test]
    fn debug_hook_may_be_skipped() {
        let mut lifecycle = Lifecycle::new();
        for stage in Stage::BUILD_ORDER.into_iter().filter(|s| !s.is_optional()) {
            lifecycle.record(stage);
        }
        assert!(lifecycle.is_complete());
        assert!(!lifecycle.is_built(Stage::DebugHook));

        let released = lifecycle.shutdown(&mut Trace::default());
        assert_eq!(released.len(), 8);
        assert!(!released.contains(&Stage::DebugHook));
        assert_eq!(released.first(), Some(&Stage::SyncObjects));
        assert_eq!(released.last(), Some(&Stage::Instance));
    }

    #[test]
    fn partial_construction_releases_only_built_stages() {
        let mut lifecycle = Lifecycle::new();
        for stage in [Stage::Instance, Stage::Surface, Stage::Device, Stage::Swapchain] {
            lifecycle.record(stage);
        }
        assert!(!lifecycle.is_complete());

        let mut trace = Trace::default();
        lifecycle.shutdown(&mut trace);
        assert_eq!(
            trace.events,
            [
                Event::WaitIdle,
                Event::Release(Stage::Swapchain),
                Event::Release(Stage::Device),
                Event::Release(Stage::Surface),
                Event::Release(Stage::Instance),
            ]
        );
    }

    #[test]
    fn no_idle_wait_without_a_device() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.record(Stage::Instance);
        lifecycle.record(Stage::Surface);

        let mut trace = Trace::default();
        lifecycle.shutdown(&mut trace);
        assert_eq!(
            trace.events,
            [Event::Release(Stage::Surface), Event::Release(Stage::Instance)]
        );
    }

    #[test]
    fn failed_drain_still_tears_down() {
        let mut lifecycle = Lifecycle::new();
        for stage in Stage::BUILD_ORDER {
            lifecycle.record(stage);
        }

        let mut trace = Trace {
            idle_fails: true,
            ..Trace::default()
        };
        let released = lifecycle.shutdown(&mut trace);
        assert_eq!(released.len(), Stage::BUILD_ORDER.len());
    }

    #[test]
    fn shutdown_twice_is_a_no_op() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.record(Stage::Instance);
        lifecycle.shutdown(&mut Trace::default());

        let mut trace = Trace::default();
        assert!(lifecycle.shutdown(&mut trace).is_empty());
        assert!(trace.events.is_empty());
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn out_of_order_construction_panics() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.record(Stage::Instance);
        lifecycle.record(Stage::Device);
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn duplicate_stage_panics() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.record(Stage::Instance);
        lifecycle.record(Stage::Instance);
    }
}
