//! Supervisor: owns the BLE adapter, both state machines, the user settings,
//! and the MQTT sinks, and serializes every event source through one
//! `select!` loop so callbacks are processed strictly in delivery order.
//!
//! The radio is shared: region monitoring needs a running scan to observe the
//! beacon's advertisements, so the cushion scan window opening/closing gates
//! which discoveries are acted on rather than toggling the adapter scan
//! itself. The adapter scan is only stopped once nothing monitors the beacon.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use btleplug::api::{
    BDAddr, Central as _, CentralEvent, CentralState, Characteristic, Peripheral as _, ScanFilter,
    ValueNotification,
};
use btleplug::platform::{Peripheral, PeripheralId};
use futures::{Stream, StreamExt as _};
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc};

use crate::alerts::{self, PolicyContext, Trigger};
use crate::beacon::{self, BeaconAction, BeaconEvent, BeaconMachine};
use crate::codec;
use crate::config::AppConfig;
use crate::messages::{BeaconRegionStatus, ConnectionState, ControlMessage, Tick};
use crate::mqtt::MqttClient;
use crate::settings::DeviceSettings;
use crate::timer::OneShot;
use crate::uart::{UartAction, UartEvent, UartMachine};

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

pub struct Manager {
    adapter: btleplug::platform::Adapter,
    mqtt_client: MqttClient,
    mqtt_event_loop: Option<rumqttc::EventLoop>,
    config: AppConfig,
    settings: DeviceSettings,
    debug: bool,

    uart: UartMachine,
    beacon: BeaconMachine,

    cushion: Option<Peripheral>,
    rx_char: Option<Characteristic>,
    tx_char: Option<Characteristic>,
    notifications: Option<NotificationStream>,
    adapter_scanning: bool,

    scan_timer: Option<OneShot>,
    exit_timer: Option<OneShot>,
    tick_tx: mpsc::UnboundedSender<Tick>,
    tick_rx: Option<mpsc::UnboundedReceiver<Tick>>,
}

impl Manager {
    pub fn new(
        adapter: btleplug::platform::Adapter,
        mqtt_client: MqttClient,
        mqtt_event_loop: rumqttc::EventLoop,
        config: AppConfig,
        debug: bool,
    ) -> Self {
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let settings = config.settings.clone();
        Manager {
            adapter,
            mqtt_client,
            mqtt_event_loop: Some(mqtt_event_loop),
            config,
            settings,
            debug,
            uart: UartMachine::new(),
            beacon: BeaconMachine::new(),
            cushion: None,
            rx_char: None,
            tx_char: None,
            notifications: None,
            adapter_scanning: false,
            scan_timer: None,
            exit_timer: None,
            tick_tx,
            tick_rx: Some(tick_rx),
        }
    }

    pub async fn run_loop(mut self) -> anyhow::Result<()> {
        let mut events = self.adapter.events().await?;
        let mut tick_rx = self
            .tick_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("run_loop started twice"))?;

        let (control_tx, mut control_rx) = broadcast::channel(10);
        if let Some(mut eventloop) = self.mqtt_event_loop.take() {
            let mqtt = self.mqtt_client.clone();
            tokio::task::spawn(async move {
                mqtt.event_loop(&mut eventloop, control_tx).await;
            });
        }

        // Fresh session: both machines start from their reset states.
        self.mqtt_client
            .publish_connection(ConnectionState::Disconnected)
            .await;
        self.dispatch_beacon(BeaconEvent::StartMonitoring).await;
        // Region monitoring observes beacon advertisements, so the radio
        // scans for the whole session.
        self.ensure_adapter_scanning().await;

        loop {
            tokio::select! {
                event = events.next() => {
                    match event {
                        Some(event) => self.handle_central_event(event).await,
                        None => {
                            warn!("BLE event stream closed");
                            break;
                        }
                    }
                }
                Some(note) = next_notification(&mut self.notifications) => {
                    self.handle_notification(note).await;
                }
                msg = control_rx.recv() => {
                    match msg {
                        Ok(ControlMessage::ScanRequest) => {
                            info!("Received scan request");
                            self.dispatch_uart(UartEvent::ScanRequested).await;
                        }
                        Ok(ControlMessage::Disconnect) => {
                            info!("Received disconnect request, tearing down session");
                            break;
                        }
                        Ok(ControlMessage::SettingsUpdate(patch)) => {
                            self.settings.apply(&patch);
                            info!("Settings updated: {:?}", self.settings);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Control receiver lagged by {} messages", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Control channel closed");
                        }
                    }
                }
                Some(tick) = tick_rx.recv() => {
                    match tick {
                        Tick::ScanTimeout => self.dispatch_uart(UartEvent::ScanTimedOut).await,
                        Tick::RegionExitTimeout => {
                            self.dispatch_beacon(BeaconEvent::ExitTimedOut).await;
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, tearing down session");
                    break;
                }
            }
        }

        self.teardown().await;
        Ok(())
    }

    /// Session teardown: cancel everything synchronously and reset both
    /// machines to their ground states.
    async fn teardown(&mut self) {
        self.dispatch_uart(UartEvent::DisconnectRequested).await;
        self.dispatch_beacon(BeaconEvent::StopMonitoring).await;
        if self.adapter_scanning {
            if let Err(err) = self.adapter.stop_scan().await {
                debug!("Error stopping scan during teardown: {:?}", err);
            }
            self.adapter_scanning = false;
        }
        if let Err(err) = self.mqtt_client.disconnect().await {
            debug!("Error disconnecting MQTT client: {:?}", err);
        }
    }

    async fn handle_central_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if self.uart.is_scanning() && self.uart.state() == ConnectionState::Disconnected {
                    if let Some(peripheral) = self.matches_cushion(&id).await {
                        debug!("Discovered cushion peripheral {:?}", id);
                        self.cushion = Some(peripheral);
                        self.dispatch_uart(UartEvent::CushionDiscovered).await;
                    }
                }
            }
            CentralEvent::ManufacturerDataAdvertisement {
                id,
                manufacturer_data,
            } => {
                for (company_id, payload) in &manufacturer_data {
                    let Some(frame) = beacon::parse_frame(*company_id, payload) else {
                        continue;
                    };
                    if frame.uuid != self.config.beacon.uuid() {
                        continue;
                    }
                    debug!(
                        "Beacon frame major={} minor={} tx_power={}",
                        frame.major, frame.minor, frame.tx_power
                    );
                    let distance = self.beacon_distance(&id, frame.tx_power).await;
                    self.dispatch_beacon(BeaconEvent::Sighted { distance }).await;
                }
            }
            CentralEvent::DeviceConnected(id) => {
                if self.is_cushion(&id) {
                    self.dispatch_uart(UartEvent::Connected).await;
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                if self.is_cushion(&id) {
                    debug!("Cushion disconnected");
                    self.notifications = None;
                    self.rx_char = None;
                    self.tx_char = None;
                    self.dispatch_uart(UartEvent::Disconnected).await;
                }
            }
            CentralEvent::StateUpdate(state) => match state {
                CentralState::PoweredOff => {
                    warn!("Bluetooth adapter powered off");
                    self.adapter_scanning = false;
                    self.dispatch_uart(UartEvent::AdapterPoweredOff).await;
                }
                CentralState::PoweredOn => {
                    info!("Bluetooth adapter powered on");
                    self.ensure_adapter_scanning().await;
                    self.dispatch_uart(UartEvent::AdapterPoweredOn).await;
                }
                _ => {}
            },
            _ => {}
        }
    }

    async fn handle_notification(&mut self, note: ValueNotification) {
        // Only the subscribed RX characteristic carries telemetry.
        let is_rx = self.rx_char.as_ref().is_some_and(|rx| rx.uuid == note.uuid);
        if !is_rx {
            return;
        }
        let reading = codec::parse(&note.value);
        if !reading.raw_valid {
            debug!("Discarding malformed payload: {:?}", note.value);
        }
        self.dispatch_uart(UartEvent::ValueUpdated(reading)).await;
    }

    /// Feed one event to the connection machine and execute the resulting
    /// actions; BLE failures feed back in as further events until quiescent.
    async fn dispatch_uart(&mut self, event: UartEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for action in self.uart.handle(event) {
                if let Some(follow_up) = self.apply_uart_action(action).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn apply_uart_action(&mut self, action: UartAction) -> Option<UartEvent> {
        match action {
            UartAction::StartScan => {
                debug!("Opening cushion scan window");
                self.ensure_adapter_scanning().await;
                None
            }
            UartAction::StopScan => {
                debug!("Closing cushion scan window");
                if self.beacon.status() == BeaconRegionStatus::NotMonitoring {
                    self.stop_adapter_scanning().await;
                }
                None
            }
            UartAction::ArmScanTimeout => {
                let tx = self.tick_tx.clone();
                let delay = Duration::from_secs(self.config.scan_timeout_seconds());
                self.scan_timer = Some(OneShot::start(delay, move || {
                    let _ = tx.send(Tick::ScanTimeout);
                }));
                None
            }
            UartAction::CancelScanTimeout => {
                if let Some(timer) = self.scan_timer.take() {
                    timer.stop();
                }
                None
            }
            UartAction::Connect => {
                let peripheral = self.cushion.as_ref()?;
                info!("Connecting to cushion {:?}", peripheral.id());
                match peripheral.connect().await {
                    Ok(()) => Some(UartEvent::Connected),
                    Err(err) => {
                        error!("Error connecting to cushion: {:?}", err);
                        Some(UartEvent::ConnectFailed)
                    }
                }
            }
            UartAction::Disconnect => {
                self.notifications = None;
                self.rx_char = None;
                self.tx_char = None;
                if let Some(peripheral) = self.cushion.take() {
                    if let Err(err) = peripheral.disconnect().await {
                        debug!("Error disconnecting cushion: {:?}", err);
                    }
                }
                None
            }
            UartAction::DiscoverServices => {
                let peripheral = self.cushion.as_ref()?;
                if let Err(err) = peripheral.discover_services().await {
                    error!("Service discovery failed: {:?}", err);
                    return Some(UartEvent::DiscoveryFailed);
                }
                let services = peripheral.services();
                if services.is_empty() {
                    return Some(UartEvent::DiscoveryFailed);
                }
                debug!("Discovered {} services", services.len());
                let characteristics = peripheral.characteristics();
                // TX is tracked for completeness; telemetry is read-only
                self.tx_char = characteristics
                    .iter()
                    .find(|c| c.uuid == self.config.cushion.tx_uuid())
                    .cloned();
                if self.tx_char.is_some() {
                    debug!("TX characteristic present");
                }
                let rx = characteristics
                    .into_iter()
                    .find(|c| c.uuid == self.config.cushion.rx_uuid());
                match rx {
                    Some(rx) => {
                        self.rx_char = Some(rx);
                        Some(UartEvent::RxLocated)
                    }
                    None => Some(UartEvent::RxMissing),
                }
            }
            UartAction::SubscribeRx => {
                let peripheral = self.cushion.as_ref()?;
                let rx = self.rx_char.as_ref()?;
                if let Err(err) = peripheral.subscribe(rx).await {
                    error!("Error subscribing to RX characteristic: {:?}", err);
                    self.mqtt_client
                        .publish_advisory(crate::uart::PROBLEM_CONNECTING)
                        .await;
                    return None;
                }
                match peripheral.notifications().await {
                    Ok(stream) => self.notifications = Some(stream),
                    Err(err) => error!("Error opening notification stream: {:?}", err),
                }
                None
            }
            UartAction::ReadRx => {
                let peripheral = self.cushion.as_ref()?;
                let rx = self.rx_char.as_ref()?;
                match peripheral.read(rx).await {
                    Ok(value) => Some(UartEvent::ValueUpdated(codec::parse(&value))),
                    Err(err) => {
                        debug!("Initial RX read failed: {:?}", err);
                        None
                    }
                }
            }
            UartAction::PublishConnection(state) => {
                self.mqtt_client.publish_connection(state).await;
                None
            }
            UartAction::PublishReading(reading) => {
                self.mqtt_client
                    .publish_reading(&reading, &self.settings)
                    .await;
                None
            }
            UartAction::Policy(trigger) => {
                self.run_policy(&trigger).await;
                None
            }
            UartAction::Advisory(message) => {
                self.mqtt_client.publish_advisory(message).await;
                None
            }
        }
    }

    async fn dispatch_beacon(&mut self, event: BeaconEvent) {
        for action in self.beacon.handle(event) {
            match action {
                BeaconAction::Entered => {
                    self.dispatch_uart(UartEvent::RegionStatus(true)).await;
                    // the primary coupling point: being near the cushion is
                    // the cue to go looking for it
                    if self.uart.state() == ConnectionState::Disconnected {
                        self.dispatch_uart(UartEvent::ScanRequested).await;
                    }
                }
                BeaconAction::Exited => {
                    self.dispatch_uart(UartEvent::RegionStatus(false)).await;
                    // stop scanning, but leave an established link alone
                    self.dispatch_uart(UartEvent::StopScanRequested).await;
                }
                BeaconAction::ArmExitTimeout => {
                    let tx = self.tick_tx.clone();
                    let delay = Duration::from_secs(self.config.region_exit_timeout_seconds());
                    self.exit_timer = Some(OneShot::start(delay, move || {
                        let _ = tx.send(Tick::RegionExitTimeout);
                    }));
                }
                BeaconAction::CancelExitTimeout => {
                    if let Some(timer) = self.exit_timer.take() {
                        timer.stop();
                    }
                }
                BeaconAction::PublishRegion(status) => {
                    self.mqtt_client
                        .publish_region(status == BeaconRegionStatus::InRegion)
                        .await;
                }
                BeaconAction::PublishProximity(proximity) => {
                    self.mqtt_client.publish_proximity(proximity).await;
                }
                BeaconAction::Policy(trigger) => {
                    self.run_policy(&trigger).await;
                }
            }
        }
    }

    async fn run_policy(&mut self, trigger: &Trigger) {
        let ctx = PolicyContext {
            connection: self.uart.state(),
            region: self.beacon.status(),
            weight_detected: self.uart.weight_detected(),
            debug: self.debug,
        };
        for alert in alerts::evaluate(trigger, &ctx, &self.settings) {
            self.mqtt_client.notify(&alert).await;
        }
    }

    fn is_cushion(&self, id: &PeripheralId) -> bool {
        self.cushion.as_ref().is_some_and(|p| p.id() == *id)
    }

    async fn matches_cushion(&self, id: &PeripheralId) -> Option<Peripheral> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let properties = peripheral.properties().await.ok()??;
        let cushion = &self.config.cushion;

        let service_match = properties.services.contains(&cushion.service_uuid());
        let name_match = cushion
            .name
            .as_deref()
            .is_some_and(|name| properties.local_name.as_deref() == Some(name));
        let address_match = cushion
            .address
            .is_some_and(|address| BDAddr::from(address.bytes()) == properties.address);

        (service_match || name_match || address_match).then_some(peripheral)
    }

    /// RSSI comes from the cached advertisement; without it the sample still
    /// counts for region presence but carries no distance.
    async fn beacon_distance(&self, id: &PeripheralId, tx_power: i8) -> Option<f64> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let properties = peripheral.properties().await.ok()??;
        let rssi = properties.rssi?;
        Some(beacon::estimate_distance(
            tx_power,
            rssi,
            self.config.beacon.path_loss_exponent(),
        ))
    }

    async fn ensure_adapter_scanning(&mut self) {
        if self.adapter_scanning {
            return;
        }
        match self.adapter.start_scan(ScanFilter::default()).await {
            Ok(()) => {
                debug!("Adapter scan started");
                self.adapter_scanning = true;
            }
            Err(err) => error!("Error starting adapter scan: {:?}", err),
        }
    }

    async fn stop_adapter_scanning(&mut self) {
        if !self.adapter_scanning {
            return;
        }
        match self.adapter.stop_scan().await {
            Ok(()) => {
                debug!("Adapter scan stopped");
                self.adapter_scanning = false;
            }
            Err(err) => error!("Error stopping adapter scan: {:?}", err),
        }
    }
}

async fn next_notification(stream: &mut Option<NotificationStream>) -> Option<ValueNotification> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
