use std::time::SystemTime;

use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::channel::oneshot;
use futures::future::pending;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::adapter::AdapterPort;
use crate::device::constants::COMMAND_CHANNEL_CAPACITY;
use crate::device::types::{
    AdapterEvent, DeviceEvent, LinkSettings, LinkState, PeripheralAddress, ScanCycle, Transition,
    TransitionReason,
};
use crate::error::{DeviceError, LinkError};

/// Requests the loop issues to the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartScan,
    StopScan,
    Connect(PeripheralAddress),
    Disconnect,
}

/// Outcome of applying one event to the loop: the transitions taken, in
/// order, and the adapter effects to issue.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub transitions: Vec<Transition>,
    pub effects: Vec<Effect>,
}

impl Step {
    fn none() -> Self {
        Step { transitions: Vec::new(), effects: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty() && self.effects.is_empty()
    }
}

/// The scan/connect lifecycle for one target peripheral.
///
/// Always scanning; on a matching advertisement, stop the scan and
/// connect; after a disconnect, resume scanning. Each event is a pure
/// `(state, event) -> (state, effects)` step, so the machine is testable
/// without a radio. At most one connection attempt is in flight at any
/// time, enforced by state: a second match while `Connecting` or
/// `Connected` issues nothing.
pub struct ScanConnectLoop {
    target: PeripheralAddress,
    state: LinkState,
}

impl ScanConnectLoop {
    pub fn new(target: PeripheralAddress) -> Self {
        ScanConnectLoop { target, state: LinkState::Idle }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn target(&self) -> &PeripheralAddress {
        &self.target
    }

    fn transition(&mut self, to: LinkState, reason: TransitionReason) -> Transition {
        let transition = Transition { at: SystemTime::now(), from: self.state, to, reason };
        self.state = to;
        transition
    }

    /// Begin scanning. Fails with `AdapterUnavailable` when the adapter
    /// is not powered, leaving the loop `Idle`; the caller is responsible
    /// for retrying once the adapter comes up. A no-op outside `Idle`.
    pub fn start(&mut self, adapter_powered: bool) -> Result<Step, LinkError> {
        if self.state != LinkState::Idle {
            return Ok(Step::none());
        }
        if !adapter_powered {
            return Err(LinkError::AdapterUnavailable);
        }

        let transition = self.transition(LinkState::Scanning, TransitionReason::StartRequested);
        Ok(Step { transitions: vec![transition], effects: vec![Effect::StartScan] })
    }

    /// Return to `Idle`, quiescing the adapter: stop the scan while
    /// `Scanning`, drop the link while `Connecting`/`Connected`. Adapter
    /// callbacks arriving afterwards are ignored.
    pub fn stop(&mut self) -> Step {
        let effects = match self.state {
            LinkState::Idle => return Step::none(),
            LinkState::Scanning | LinkState::Disconnected => vec![Effect::StopScan],
            LinkState::Connecting | LinkState::Connected => vec![Effect::Disconnect],
        };

        let transition = self.transition(LinkState::Idle, TransitionReason::StopRequested);
        Step { transitions: vec![transition], effects }
    }

    pub fn on_event(&mut self, event: AdapterEvent) -> Step {
        match (self.state, event) {
            // late adapter callbacks after stop() are never applied to state
            (LinkState::Idle, _) => Step::none(),

            (LinkState::Scanning, AdapterEvent::Discovered(device)) => {
                if device.address != self.target {
                    return Step::none();
                }

                // stop before connecting, so further scan callbacks do not
                // race the connect attempt
                let transition = self.transition(LinkState::Connecting, TransitionReason::TargetDiscovered);
                Step {
                    transitions: vec![transition],
                    effects: vec![Effect::StopScan, Effect::Connect(self.target.clone())],
                }
            },

            (LinkState::Connecting, AdapterEvent::LinkUp) => {
                let transition = self.transition(LinkState::Connected, TransitionReason::LinkUp);
                Step { transitions: vec![transition], effects: Vec::new() }
            },

            (LinkState::Connecting, AdapterEvent::LinkDown { status }) => {
                self.lost(TransitionReason::ConnectFailed(status))
            },

            (LinkState::Connected, AdapterEvent::LinkDown { status }) => {
                self.lost(TransitionReason::LinkDown(status))
            },

            // duplicate link-up reports and advertisements seen outside
            // Scanning carry no new information
            (LinkState::Scanning, AdapterEvent::LinkUp | AdapterEvent::LinkDown { .. })
            | (LinkState::Connecting | LinkState::Connected, AdapterEvent::Discovered(_))
            | (LinkState::Connected, AdapterEvent::LinkUp)
            | (LinkState::Disconnected, _) => Step::none(),
        }
    }

    // Disconnected is transient: the loop re-enters Scanning in the same
    // step, with no external input.
    fn lost(&mut self, reason: TransitionReason) -> Step {
        let down = self.transition(LinkState::Disconnected, reason);
        let rescan = self.transition(LinkState::Scanning, TransitionReason::Rescan);
        Step { transitions: vec![down, rescan], effects: vec![Effect::StartScan] }
    }
}

#[derive(Debug)]
pub enum LinkCommand {
    Start(oneshot::Sender<Result<(), LinkError>>),
    Stop,
}

#[derive(Debug, Clone, Copy)]
struct CycleTimer {
    scanning: bool,
    deadline: Instant,
}

impl CycleTimer {
    fn new(cycle: ScanCycle) -> Self {
        CycleTimer { scanning: true, deadline: Instant::now() + cycle.active }
    }

    fn flip(&mut self, cycle: ScanCycle) {
        self.scanning = !self.scanning;
        self.deadline = Instant::now() + if self.scanning { cycle.active } else { cycle.pause };
    }
}

async fn toggle_at(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending::<()>().await,
    }
}

fn emit(senders: &mut Vec<Sender<DeviceEvent>>, event: DeviceEvent) {
    for sender in senders {
        // fire and forget: a slow or closed consumer never stalls the loop
        if let Err(err) = sender.try_send(event.clone()) {
            debug!("Dropping device event: {}", err);
        }
    }
}

async fn apply_step<A: AdapterPort>(
    adapter: &A,
    settings: &LinkSettings,
    senders: &mut Vec<Sender<DeviceEvent>>,
    step: Step,
) -> Option<AdapterEvent> {
    let rescanning = step
        .transitions
        .iter()
        .any(|transition| transition.reason == TransitionReason::Rescan);

    for transition in &step.transitions {
        info!("{}", transition);
        emit(senders, DeviceEvent::Transition(transition.clone()));
    }

    for effect in step.effects {
        match effect {
            Effect::StartScan => {
                if rescanning && !settings.rescan_delay.is_zero() {
                    sleep(settings.rescan_delay).await;
                }
                if let Err(err) = adapter.start_scan().await {
                    warn!("Starting scan failed: {:?}", err);
                }
            },
            Effect::StopScan => {
                if let Err(err) = adapter.stop_scan().await {
                    warn!("Stopping scan failed: {:?}", err);
                }
            },
            Effect::Connect(address) => {
                if let Err(err) = adapter.connect(&address).await {
                    warn!("Connecting to {} failed: {:?}", address, err);
                    return Some(AdapterEvent::LinkDown { status: Some(err.to_string()) });
                }
            },
            Effect::Disconnect => {
                if let Err(err) = adapter.disconnect().await {
                    warn!("Disconnecting failed: {:?}", err);
                }
            },
        }
    }

    None
}

async fn run_steps<A: AdapterPort>(
    adapter: &A,
    settings: &LinkSettings,
    senders: &mut Vec<Sender<DeviceEvent>>,
    machine: &mut ScanConnectLoop,
    step: Step,
) {
    // a connect that fails outright feeds back into the machine as a
    // link-down, which in turn yields the rescan step
    let mut next = Some(step);
    while let Some(step) = next.take() {
        if let Some(event) = apply_step(adapter, settings, senders, step).await {
            next = Some(machine.on_event(event));
        }
    }
}

async fn run_link<A>(
    cancel: CancellationToken,
    adapter: A,
    settings: LinkSettings,
    mut senders: Vec<Sender<DeviceEvent>>,
    mut commands: Receiver<LinkCommand>,
) -> Result<(), DeviceError>
where
    A: AdapterPort + 'static,
{
    let mut machine = ScanConnectLoop::new(settings.target.clone());
    let mut events = adapter.events().await?;
    let mut cycle: Option<CycleTimer> = None;

    'mainloop: loop {
        cycle = match (machine.state(), settings.scan_cycle) {
            (LinkState::Scanning, Some(tuning)) => Some(cycle.unwrap_or_else(|| CycleTimer::new(tuning))),
            _ => None,
        };
        let deadline = cycle.map(|timer| timer.deadline);

        tokio::select! {
            _ = cancel.cancelled() => {
                let step = machine.stop();
                run_steps(&adapter, &settings, &mut senders, &mut machine, step).await;
                break 'mainloop;
            },
            command = commands.next() => match command {
                None => {
                    let step = machine.stop();
                    run_steps(&adapter, &settings, &mut senders, &mut machine, step).await;
                    break 'mainloop;
                },
                Some(LinkCommand::Start(reply)) => {
                    let powered = match adapter.is_powered().await {
                        Ok(powered) => powered,
                        Err(err) => {
                            warn!("Failed to query adapter state: {:?}", err);
                            false
                        },
                    };

                    match machine.start(powered) {
                        Ok(step) => {
                            run_steps(&adapter, &settings, &mut senders, &mut machine, step).await;
                            let _ = reply.send(Ok(()));
                        },
                        Err(err) => {
                            let _ = reply.send(Err(err));
                        },
                    }
                },
                Some(LinkCommand::Stop) => {
                    let step = machine.stop();
                    run_steps(&adapter, &settings, &mut senders, &mut machine, step).await;
                },
            },
            event = events.next() => match event {
                Some(event) => {
                    if let AdapterEvent::Discovered(device) = &event {
                        debug!("Saw {}", device);
                    }
                    let step = machine.on_event(event);
                    run_steps(&adapter, &settings, &mut senders, &mut machine, step).await;
                },
                None => {
                    warn!("Adapter event stream ended");
                    break 'mainloop;
                },
            },
            _ = toggle_at(deadline) => {
                if let (Some(timer), Some(tuning)) = (cycle.as_mut(), settings.scan_cycle) {
                    if timer.scanning {
                        debug!("Pausing scan for {:?}", tuning.pause);
                        if let Err(err) = adapter.stop_scan().await {
                            warn!("Pausing scan failed: {:?}", err);
                        }
                    } else {
                        debug!("Resuming scan");
                        if let Err(err) = adapter.start_scan().await {
                            warn!("Resuming scan failed: {:?}", err);
                        }
                    }
                    timer.flip(tuning);
                }
            },
        }
    }

    Ok(())
}

/// Spawn the link loop for one peripheral. Commands go in through the
/// returned sender; every state transition is logged and fanned out to
/// `senders` as it happens.
pub fn link_task<A>(
    cancel: CancellationToken,
    adapter: A,
    settings: LinkSettings,
    senders: Vec<Sender<DeviceEvent>>,
) -> (Sender<LinkCommand>, JoinHandle<Result<(), DeviceError>>)
where
    A: AdapterPort + 'static,
{
    let (command_sender, command_receiver) = channel::<LinkCommand>(COMMAND_CHANNEL_CAPACITY);
    let handle = spawn(run_link(cancel, adapter, settings, senders, command_receiver));

    (command_sender, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::DiscoveredDevice;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use futures::SinkExt;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::timeout;

    const TARGET: &str = "AA:BB:CC:DD:EE:FF";
    const OTHER: &str = "11:22:33:44:55:66";

    fn addr(value: &str) -> PeripheralAddress {
        value.parse().unwrap()
    }

    fn seen(address: &str) -> AdapterEvent {
        AdapterEvent::Discovered(DiscoveredDevice {
            address: addr(address),
            rssi: Some(-60),
            local_name: None,
        })
    }

    fn scanning_machine() -> ScanConnectLoop {
        let mut machine = ScanConnectLoop::new(addr(TARGET));
        machine.start(true).unwrap();
        machine
    }

    #[test]
    fn start_fails_when_adapter_is_not_powered() {
        let mut machine = ScanConnectLoop::new(addr(TARGET));

        assert_eq!(machine.start(false), Err(LinkError::AdapterUnavailable));
        assert_eq!(machine.state(), LinkState::Idle);

        // the caller may retry once the adapter comes up
        let step = machine.start(true).unwrap();
        assert_eq!(machine.state(), LinkState::Scanning);
        assert_eq!(step.effects, vec![Effect::StartScan]);
    }

    #[test]
    fn start_is_a_noop_outside_idle() {
        let mut machine = scanning_machine();

        let step = machine.start(true).unwrap();
        assert!(step.is_empty());
        assert_eq!(machine.state(), LinkState::Scanning);
    }

    #[test]
    fn non_matching_advertisements_are_ignored() {
        let mut machine = scanning_machine();

        for address in ["11:22:33:44:55:66", "22:33:44:55:66:77", "33:44:55:66:77:88"] {
            let step = machine.on_event(seen(address));
            assert!(step.is_empty());
        }

        assert_eq!(machine.state(), LinkState::Scanning);
    }

    #[test]
    fn matching_advertisement_stops_scan_then_connects() {
        let mut machine = scanning_machine();

        assert!(machine.on_event(seen(OTHER)).is_empty());

        let step = machine.on_event(seen(TARGET));
        assert_eq!(step.effects, vec![Effect::StopScan, Effect::Connect(addr(TARGET))]);
        assert_eq!(step.transitions.len(), 1);
        assert_eq!(step.transitions[0].from, LinkState::Scanning);
        assert_eq!(step.transitions[0].to, LinkState::Connecting);
        assert_eq!(machine.state(), LinkState::Connecting);
    }

    #[test]
    fn repeated_matches_issue_no_second_connect() {
        let mut machine = scanning_machine();
        machine.on_event(seen(TARGET));

        assert!(machine.on_event(seen(TARGET)).is_empty());
        assert_eq!(machine.state(), LinkState::Connecting);

        machine.on_event(AdapterEvent::LinkUp);
        assert!(machine.on_event(seen(TARGET)).is_empty());
        assert_eq!(machine.state(), LinkState::Connected);
    }

    #[test]
    fn link_up_completes_the_connect() {
        let mut machine = scanning_machine();
        machine.on_event(seen(TARGET));

        let step = machine.on_event(AdapterEvent::LinkUp);
        assert!(step.effects.is_empty());
        assert_eq!(step.transitions.len(), 1);
        assert_eq!(step.transitions[0].to, LinkState::Connected);
        assert_eq!(machine.state(), LinkState::Connected);
    }

    #[test]
    fn link_loss_resumes_scanning_without_external_input() {
        let mut machine = scanning_machine();
        machine.on_event(seen(TARGET));
        machine.on_event(AdapterEvent::LinkUp);

        let step = machine.on_event(AdapterEvent::LinkDown { status: Some("timeout".to_string()) });

        assert_eq!(step.transitions.len(), 2);
        assert_eq!(step.transitions[0].from, LinkState::Connected);
        assert_eq!(step.transitions[0].to, LinkState::Disconnected);
        assert_eq!(
            step.transitions[0].reason,
            TransitionReason::LinkDown(Some("timeout".to_string())),
        );
        assert_eq!(step.transitions[1].from, LinkState::Disconnected);
        assert_eq!(step.transitions[1].to, LinkState::Scanning);
        assert_eq!(step.effects, vec![Effect::StartScan]);
        assert_eq!(machine.state(), LinkState::Scanning);
    }

    #[test]
    fn connect_failure_resumes_scanning() {
        let mut machine = scanning_machine();
        machine.on_event(seen(TARGET));

        let step = machine.on_event(AdapterEvent::LinkDown { status: None });

        assert_eq!(step.transitions[0].reason, TransitionReason::ConnectFailed(None));
        assert_eq!(machine.state(), LinkState::Scanning);
    }

    #[test]
    fn stop_from_scanning_stops_the_scan_once() {
        let mut machine = scanning_machine();

        let step = machine.stop();
        assert_eq!(step.effects, vec![Effect::StopScan]);
        assert_eq!(step.transitions.len(), 1);
        assert_eq!(step.transitions[0].reason, TransitionReason::StopRequested);
        assert_eq!(machine.state(), LinkState::Idle);

        assert!(machine.stop().is_empty());
    }

    #[test]
    fn stop_while_connected_drops_the_link() {
        let mut machine = scanning_machine();
        machine.on_event(seen(TARGET));
        machine.on_event(AdapterEvent::LinkUp);

        let step = machine.stop();
        assert_eq!(step.effects, vec![Effect::Disconnect]);
        assert_eq!(machine.state(), LinkState::Idle);
    }

    #[test]
    fn late_callbacks_after_stop_are_ignored() {
        let mut machine = scanning_machine();
        machine.stop();

        assert!(machine.on_event(seen(TARGET)).is_empty());
        assert!(machine.on_event(AdapterEvent::LinkUp).is_empty());
        assert!(machine.on_event(AdapterEvent::LinkDown { status: None }).is_empty());
        assert_eq!(machine.state(), LinkState::Idle);
    }

    #[test]
    fn every_transition_is_recorded_once() {
        let mut machine = ScanConnectLoop::new(addr(TARGET));
        let mut transitions = Vec::new();

        transitions.extend(machine.start(true).unwrap().transitions);
        transitions.extend(machine.on_event(seen(TARGET)).transitions);
        transitions.extend(machine.on_event(AdapterEvent::LinkUp).transitions);
        transitions.extend(machine.on_event(AdapterEvent::LinkDown { status: None }).transitions);
        transitions.extend(machine.stop().transitions);

        // idle -> scanning -> connecting -> connected -> disconnected
        //      -> scanning -> idle: each hop logged exactly once, chained
        assert_eq!(transitions.len(), 6);
        assert_eq!(transitions[0].from, LinkState::Idle);
        for pair in transitions.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
        assert_eq!(transitions[5].to, LinkState::Idle);
    }

    #[derive(Debug, Clone, PartialEq)]
    enum MockCall {
        StartScan,
        StopScan,
        Connect(PeripheralAddress),
        Disconnect,
    }

    struct MockAdapter {
        powered: bool,
        calls: Arc<Mutex<Vec<MockCall>>>,
        events_rx: Mutex<Option<Receiver<AdapterEvent>>>,
    }

    impl MockAdapter {
        fn new(powered: bool) -> (Self, Sender<AdapterEvent>, Arc<Mutex<Vec<MockCall>>>) {
            let (events_tx, events_rx) = channel::<AdapterEvent>(16);
            let calls = Arc::new(Mutex::new(Vec::new()));
            let adapter = MockAdapter {
                powered,
                calls: Arc::clone(&calls),
                events_rx: Mutex::new(Some(events_rx)),
            };

            (adapter, events_tx, calls)
        }

        fn record(&self, call: MockCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl AdapterPort for MockAdapter {
        async fn is_powered(&self) -> Result<bool, DeviceError> {
            Ok(self.powered)
        }

        async fn start_scan(&self) -> Result<(), DeviceError> {
            self.record(MockCall::StartScan);
            Ok(())
        }

        async fn stop_scan(&self) -> Result<(), DeviceError> {
            self.record(MockCall::StopScan);
            Ok(())
        }

        async fn connect(&self, address: &PeripheralAddress) -> Result<(), DeviceError> {
            self.record(MockCall::Connect(address.clone()));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), DeviceError> {
            self.record(MockCall::Disconnect);
            Ok(())
        }

        async fn events(&self) -> Result<BoxStream<'static, AdapterEvent>, DeviceError> {
            let rx = self
                .events_rx
                .lock()
                .unwrap()
                .take()
                .ok_or(DeviceError::EventStreamTaken)?;
            Ok(rx.boxed())
        }
    }

    async fn start_link(commands: &mut Sender<LinkCommand>) -> Result<(), LinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        commands.send(LinkCommand::Start(reply_tx)).await.unwrap();
        reply_rx.await.unwrap()
    }

    async fn next_transition(events: &mut Receiver<DeviceEvent>) -> Transition {
        let event = timeout(Duration::from_secs(1), events.next())
            .await
            .expect("timed out waiting for a device event")
            .expect("device event channel closed");
        let DeviceEvent::Transition(transition) = event;
        transition
    }

    #[tokio::test]
    async fn runner_drives_the_full_lifecycle() {
        let (adapter, mut inject, calls) = MockAdapter::new(true);
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel::<DeviceEvent>(16);
        let (mut commands, handle) = link_task(
            cancel.clone(),
            adapter,
            LinkSettings::new(addr(TARGET)),
            vec![event_tx],
        );

        start_link(&mut commands).await.unwrap();
        let transition = next_transition(&mut events).await;
        assert_eq!((transition.from, transition.to), (LinkState::Idle, LinkState::Scanning));

        inject.send(seen(OTHER)).await.unwrap();
        inject.send(seen(TARGET)).await.unwrap();
        let transition = next_transition(&mut events).await;
        assert_eq!((transition.from, transition.to), (LinkState::Scanning, LinkState::Connecting));

        inject.send(AdapterEvent::LinkUp).await.unwrap();
        let transition = next_transition(&mut events).await;
        assert_eq!((transition.from, transition.to), (LinkState::Connecting, LinkState::Connected));

        inject.send(AdapterEvent::LinkDown { status: None }).await.unwrap();
        let transition = next_transition(&mut events).await;
        assert_eq!((transition.from, transition.to), (LinkState::Connected, LinkState::Disconnected));
        let transition = next_transition(&mut events).await;
        assert_eq!((transition.from, transition.to), (LinkState::Disconnected, LinkState::Scanning));

        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                MockCall::StartScan,
                MockCall::StopScan,
                MockCall::Connect(addr(TARGET)),
                MockCall::StartScan,
                MockCall::StopScan,
            ],
        );
    }

    #[tokio::test]
    async fn runner_reports_unavailable_adapter_to_the_start_caller() {
        let (adapter, _inject, calls) = MockAdapter::new(false);
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel::<DeviceEvent>(16);
        let (mut commands, handle) = link_task(
            cancel.clone(),
            adapter,
            LinkSettings::new(addr(TARGET)),
            vec![event_tx],
        );

        assert_eq!(start_link(&mut commands).await, Err(LinkError::AdapterUnavailable));

        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn runner_ignores_callbacks_after_stop() {
        let (adapter, mut inject, calls) = MockAdapter::new(true);
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel::<DeviceEvent>(16);
        let (mut commands, handle) = link_task(
            cancel.clone(),
            adapter,
            LinkSettings::new(addr(TARGET)),
            vec![event_tx],
        );

        start_link(&mut commands).await.unwrap();
        next_transition(&mut events).await;

        commands.send(LinkCommand::Stop).await.unwrap();
        let transition = next_transition(&mut events).await;
        assert_eq!((transition.from, transition.to), (LinkState::Scanning, LinkState::Idle));

        inject.send(seen(TARGET)).await.unwrap();
        sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        handle.await.unwrap().unwrap();

        // no connect was issued for the late discovery, and no further
        // transitions were emitted
        assert_eq!(*calls.lock().unwrap(), vec![MockCall::StartScan, MockCall::StopScan]);
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn runner_duty_cycles_the_scan_when_configured() {
        let (adapter, _inject, calls) = MockAdapter::new(true);
        let cancel = CancellationToken::new();
        let (event_tx, mut events) = channel::<DeviceEvent>(16);
        let mut settings = LinkSettings::new(addr(TARGET));
        settings.scan_cycle = Some(ScanCycle {
            active: Duration::from_millis(50),
            pause: Duration::from_millis(30),
        });
        let (mut commands, handle) = link_task(cancel.clone(), adapter, settings, vec![event_tx]);

        start_link(&mut commands).await.unwrap();
        next_transition(&mut events).await;

        sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        // scan started, paused after the active window, resumed after the
        // pause; the loop state never left Scanning
        let calls = calls.lock().unwrap();
        assert!(calls.len() >= 3, "expected cycling calls, got {:?}", *calls);
        assert_eq!(calls[0], MockCall::StartScan);
        assert_eq!(calls[1], MockCall::StopScan);
        assert_eq!(calls[2], MockCall::StartScan);
    }
}
