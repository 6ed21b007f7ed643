//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use hierperms::{Engine, EngineConfig, Membership, DEFAULT_GROUP};
use hierperms_core::{Clock, Millis, UserId};

/// The instant every fixture clock starts at.
pub const FIXTURE_EPOCH: Millis = 1_700_000_000_000;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: Millis) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, millis: Millis) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(FIXTURE_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

/// A deterministic user id.
pub fn user_id(n: u8) -> UserId {
    UserId::from_bytes([n; 16])
}

/// A test fixture with an engine on a manual clock.
pub struct TestFixture {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
}

impl TestFixture {
    /// Create a fixture with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a fixture with a custom configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        Self {
            engine: Engine::with_clock(config, clock.clone()),
            clock,
        }
    }

    /// A fixture preloaded with a small server hierarchy:
    ///
    /// ```text
    /// default  {chat}           prefix [guest]
    /// ├── member {build}        prefix [member]  priority 10
    /// │   └── mod {kick}        prefix [mod]     priority 5
    /// ├── vip {fly}             prefix [vip]     priority 20
    /// └── admin {*}             prefix [admin]   priority 0
    /// ```
    ///
    /// The dirty flag is cleared afterwards.
    pub fn server() -> Self {
        let fixture = Self::new();
        fixture
            .with_group(DEFAULT_GROUP, None, 0, &["chat"])
            .with_group("member", None, 10, &["build"])
            .with_group("mod", Some("member"), 5, &["kick"])
            .with_group("vip", None, 20, &["fly"])
            .with_group("admin", None, 0, &["*"]);
        for (group, prefix) in [
            (DEFAULT_GROUP, "[guest]"),
            ("member", "[member]"),
            ("mod", "[mod]"),
            ("vip", "[vip]"),
            ("admin", "[admin]"),
        ] {
            fixture
                .engine
                .set_group_metadata(group, "prefix", prefix)
                .expect("fixture group exists");
        }
        fixture.engine.take_dirty();
        fixture
    }

    /// Create a group (unless it exists) and grant it `permissions`.
    pub fn with_group(
        &self,
        name: &str,
        parent: Option<&str>,
        priority: i32,
        permissions: &[&str],
    ) -> &Self {
        if self.engine.group(name).is_none() {
            self.engine
                .create_group(name, parent, priority)
                .expect("fixture group can be created");
        }
        for token in permissions {
            self.engine
                .grant_group_permission(name, token)
                .expect("fixture group exists");
        }
        self
    }

    /// Put a user in a group permanently.
    pub fn join(&self, user: UserId, group: &str) {
        self.engine
            .join_group(user, group, Membership::Permanent)
            .expect("fixture group exists");
    }

    /// Put a user in a group until `millis` from now.
    pub fn join_for(&self, user: UserId, group: &str, millis: Millis) {
        self.engine
            .join_group(user, group, Membership::Until(self.now() + millis))
            .expect("fixture group exists");
    }

    /// The fixture clock's current time.
    pub fn now(&self) -> Millis {
        self.clock.now_millis()
    }

    /// Move the fixture clock forward.
    pub fn advance(&self, millis: Millis) {
        self.clock.advance(millis);
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
