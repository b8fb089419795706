// ABOUTME: Test support utilities.
// ABOUTME: In-memory fakes for the collaborators, a tiny HTTP responder, and tracing init.

// Each test binary only uses some of these helpers, so allow dead_code.
#![allow(dead_code)]

use async_trait::async_trait;
use kuapo::config::RetireMode;
use kuapo::deploy::{DeploySettings, Orchestrator};
use kuapo::health::{HttpCheck, ProbeError, ProbePolicy};
use kuapo::provision::{ProvisionError, Provisioner};
use kuapo::smoke::SmokeSuite;
use kuapo::store::{MemoryStateStore, TargetState};
use kuapo::traffic::{DirectorError, TrafficDirector};
use kuapo::types::{Color, TargetName};
use nonempty::NonEmpty;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("kuapo=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn target() -> TargetName {
    TargetName::new("web").unwrap()
}

/// Instance addresses the fake provisioner hands out, e.g. `green-1:80`.
pub fn addresses(color: Color, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{color}-{i}:80")).collect()
}

/// Settings with millisecond timings so failure paths finish quickly.
pub fn fast_settings(fleet_size: usize) -> DeploySettings {
    DeploySettings {
        fleet_size,
        probe: ProbePolicy {
            path: "/health".to_string(),
            expected_status: NonEmpty::new(200),
            probe_timeout: Duration::from_millis(200),
            retries: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        },
        instance_timeout: Duration::from_secs(1),
        health_deadline: Duration::from_secs(2),
        verify_deadline: Duration::from_secs(2),
        live_endpoint: None,
        smoke_suite: SmokeSuite {
            checks: Vec::new(),
            timeout: Duration::from_millis(200),
        },
        grace_period: Duration::ZERO,
        retire_mode: RetireMode::Deprovision,
        provision_timeout: Duration::from_secs(2),
        traffic_timeout: Duration::from_secs(1),
    }
}

// =============================================================================
// Provisioner
// =============================================================================

#[derive(Default)]
struct ProvisionerState {
    fleets: HashMap<Color, Vec<String>>,
    calls: Vec<String>,
    ensure_error: Option<String>,
    deprovision_error: Option<String>,
    shortfall: usize,
    ensure_delay: Duration,
}

/// Provisioner that hands out `<color>-<n>:80` addresses.
#[derive(Default)]
pub struct FakeProvisioner {
    state: Mutex<ProvisionerState>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a color's fleet already exists.
    pub fn with_fleet(self, color: Color, size: usize) -> Self {
        self.state.lock().fleets.insert(color, addresses(color, size));
        self
    }

    pub fn fail_ensure(self, reason: &str) -> Self {
        self.state.lock().ensure_error = Some(reason.to_string());
        self
    }

    pub fn fail_deprovision(self, reason: &str) -> Self {
        self.state.lock().deprovision_error = Some(reason.to_string());
        self
    }

    /// Deliver `n` fewer instances than requested.
    pub fn short_by(self, n: usize) -> Self {
        self.state.lock().shortfall = n;
        self
    }

    pub fn ensure_delay(self, delay: Duration) -> Self {
        self.state.lock().ensure_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn fleet(&self, color: Color) -> Option<Vec<String>> {
        self.state.lock().fleets.get(&color).cloned()
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn ensure_fleet(
        &self,
        color: Color,
        desired_size: usize,
    ) -> Result<Vec<String>, ProvisionError> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(format!("ensure {color} {desired_size}"));
            state.ensure_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(reason) = &state.ensure_error {
            return Err(ProvisionError::Failed(reason.clone()));
        }
        let fleet = addresses(color, desired_size.saturating_sub(state.shortfall));
        state.fleets.insert(color, fleet.clone());
        Ok(fleet)
    }

    async fn deprovision(&self, color: Color) -> Result<(), ProvisionError> {
        let mut state = self.state.lock();
        state.calls.push(format!("deprovision {color}"));
        if let Some(reason) = &state.deprovision_error {
            return Err(ProvisionError::Failed(reason.clone()));
        }
        state.fleets.remove(&color);
        Ok(())
    }
}

// =============================================================================
// Traffic Director
// =============================================================================

#[derive(Default)]
struct DirectorState {
    active: Option<Color>,
    registered: HashMap<Color, Vec<String>>,
    calls: Vec<String>,
    fail_activate: HashSet<Color>,
    fail_register: bool,
    /// Activation reports success but routing never changes.
    ignore_activate: bool,
    fail_current: bool,
    activate_delay: Duration,
}

/// Load balancer fake tracking registrations and the live color.
#[derive(Default)]
pub struct FakeDirector {
    state: Mutex<DirectorState>,
}

impl FakeDirector {
    pub fn new(active: Option<Color>) -> Self {
        let director = Self::default();
        director.state.lock().active = active;
        director
    }

    pub fn fail_activate(self, color: Color) -> Self {
        self.state.lock().fail_activate.insert(color);
        self
    }

    pub fn fail_register(self) -> Self {
        self.state.lock().fail_register = true;
        self
    }

    pub fn ignore_activate(self) -> Self {
        self.state.lock().ignore_activate = true;
        self
    }

    pub fn activate_delay(self, delay: Duration) -> Self {
        self.state.lock().activate_delay = delay;
        self
    }

    pub fn set_fail_current(&self, fail: bool) {
        self.state.lock().fail_current = fail;
    }

    /// Change live routing behind the orchestrator's back.
    pub fn set_active(&self, color: Option<Color>) {
        self.state.lock().active = color;
    }

    pub fn active(&self) -> Option<Color> {
        self.state.lock().active
    }

    pub fn registered(&self, color: Color) -> Vec<String> {
        self.state
            .lock()
            .registered
            .get(&color)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Calls that change routing (everything except reads).
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c != "current")
            .collect()
    }
}

#[async_trait]
impl TrafficDirector for FakeDirector {
    async fn register_targets(
        &self,
        color: Color,
        instances: &[String],
    ) -> Result<(), DirectorError> {
        let mut state = self.state.lock();
        state.calls.push(format!("register {color}"));
        if state.fail_register {
            return Err(DirectorError::Failed("register rejected".to_string()));
        }
        state
            .registered
            .entry(color)
            .or_default()
            .extend(instances.iter().cloned());
        Ok(())
    }

    async fn deregister_targets(
        &self,
        color: Color,
        instances: &[String],
    ) -> Result<(), DirectorError> {
        let mut state = self.state.lock();
        state.calls.push(format!("deregister {color}"));
        if let Some(registered) = state.registered.get_mut(&color) {
            registered.retain(|i| !instances.contains(i));
        }
        Ok(())
    }

    async fn activate_color(&self, color: Color) -> Result<(), DirectorError> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(format!("activate {color}"));
            state.activate_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.fail_activate.contains(&color) {
            return Err(DirectorError::Failed(format!("activate {color} rejected")));
        }
        if !state.ignore_activate {
            state.active = Some(color);
        }
        Ok(())
    }

    async fn current_active_color(&self) -> Result<Option<Color>, DirectorError> {
        let mut state = self.state.lock();
        state.calls.push("current".to_string());
        if state.fail_current {
            return Err(DirectorError::Failed("director unreachable".to_string()));
        }
        Ok(state.active)
    }
}

// =============================================================================
// HTTP checks
// =============================================================================

/// Scripted response meaning "never answer".
pub const HANG: u16 = 0;
/// Scripted response meaning "connection refused".
pub const REFUSE: u16 = 1;

/// HTTP fake answering 200 unless an address has a script.
///
/// A script is consumed one status per call; its last entry repeats.
#[derive(Default)]
pub struct FakeChecker {
    scripts: Mutex<HashMap<String, VecDeque<u16>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, address: &str, statuses: &[u16]) -> Self {
        self.scripts
            .lock()
            .insert(address.to_string(), statuses.iter().copied().collect());
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().iter().filter(|(_, p)| p == path).count()
    }

    fn next_status(&self, address: &str) -> u16 {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(address) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(200),
            Some(script) => script.front().copied().unwrap_or(200),
            None => 200,
        }
    }
}

#[async_trait]
impl HttpCheck for FakeChecker {
    async fn get_status(&self, address: &str, path: &str) -> Result<u16, ProbeError> {
        self.calls
            .lock()
            .push((address.to_string(), path.to_string()));
        match self.next_status(address) {
            HANG => std::future::pending().await,
            REFUSE => Err(ProbeError::Connect {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            }),
            status => Ok(status),
        }
    }
}

// =============================================================================
// Harness
// =============================================================================

pub type TestOrchestrator =
    Orchestrator<FakeProvisioner, FakeDirector, MemoryStateStore, FakeChecker>;

/// Collaborators plus an orchestrator wired to them.
pub struct Harness {
    pub provisioner: Arc<FakeProvisioner>,
    pub director: Arc<FakeDirector>,
    pub store: Arc<MemoryStateStore>,
    pub checker: Arc<FakeChecker>,
    pub orchestrator: TestOrchestrator,
}

impl Harness {
    pub fn new(
        settings: DeploySettings,
        provisioner: FakeProvisioner,
        director: FakeDirector,
        checker: FakeChecker,
    ) -> Self {
        init_tracing();
        let active = director.active();
        let store = MemoryStateStore::new().with_target(
            &target(),
            TargetState {
                active_color: active,
                ..TargetState::default()
            },
        );
        Self::with_store(settings, provisioner, director, checker, store)
    }

    pub fn with_store(
        settings: DeploySettings,
        provisioner: FakeProvisioner,
        director: FakeDirector,
        checker: FakeChecker,
        store: MemoryStateStore,
    ) -> Self {
        init_tracing();
        let provisioner = Arc::new(provisioner);
        let director = Arc::new(director);
        let store = Arc::new(store);
        let checker = Arc::new(checker);
        let orchestrator = Orchestrator::new(
            target(),
            settings,
            provisioner.clone(),
            director.clone(),
            store.clone(),
            checker.clone(),
        );
        Self {
            provisioner,
            director,
            store,
            checker,
            orchestrator,
        }
    }

    /// Blue live with `size` instances, all HTTP checks healthy.
    pub fn blue_live(size: usize) -> Self {
        Self::new(
            fast_settings(size),
            FakeProvisioner::new().with_fleet(Color::Blue, size),
            FakeDirector::new(Some(Color::Blue)),
            FakeChecker::new(),
        )
    }
}

// =============================================================================
// HTTP responder
// =============================================================================

/// Serve `status` for every request on an ephemeral port; returns `host:port`.
pub async fn spawn_http_responder(status: u16) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                // Read until the end of the request headers.
                while read < buf.len() {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read += n,
                    }
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status} Test\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    address
}

/// An address nothing listens on.
pub async fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}
