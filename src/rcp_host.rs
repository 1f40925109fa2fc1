//! Ownership and control of the Thread stack instance.
//!
//! `RcpHost` owns the instance between `init` and `deinit`, runs the
//! enable/disable/join/leave/migrate state machine, and relays stack events
//! to the rest of the agent. Async operations deliver their results through
//! receivers queued on the mainloop, never re-entrantly from within the
//! requesting call.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::Ipv6Addr;
use std::rc::Rc;

use log::{info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::mainloop::{MainloopContext, MainloopProcessor};
use crate::ot::sim::{SimSettings, SimulatedInstance};
use crate::ot::srp::SrpUpdate;
use crate::ot::{
    ChangedFlags, ChannelMaxPower, DatasetTlvs, DeviceRole, Event, InstanceConfig,
    InstanceInterface, OperationalDataset,
};
use crate::thread_helper::ThreadHelper;

/// Delivers the outcome of one asynchronous operation, exactly once.
pub type AsyncResultReceiver = Box<dyn FnOnce(Result<()>)>;

/// Delivers `(supported, preferred)` channel masks.
pub type ChannelMasksReceiver = Box<dyn FnOnce(u32, u32)>;

/// Observes stack state-changed flags, with the instance available for
/// property reads.
pub type ThreadStateChangedCallback = Box<dyn FnMut(ChangedFlags, &mut dyn InstanceInterface)>;

/// Observes [`ThreadEnabledState`] transitions.
pub type ThreadEnabledStateCallback = Box<dyn FnMut(ThreadEnabledState)>;

/// Receives SRP server update transactions for advertising.
pub type SrpAdvertisingHandler = Box<dyn FnMut(&mut dyn InstanceInterface, SrpUpdate)>;

/// Receives datagrams the stack wants forwarded to a host-side UDP peer:
/// `(payload, peer_addr, peer_port, thread_port)`.
pub type UdpForwardSendHandler = Box<dyn FnMut(&[u8], Ipv6Addr, u16, u16)>;

/// Invoked after the stack instance has been re-initialised.
pub type ResetHandler = Box<dyn FnMut()>;

/// Factory building a stack instance from the stored configuration.
pub type InstanceFactory = Box<dyn Fn(&InstanceConfig) -> Box<dyn InstanceInterface>>;

/// Whether the host allows Thread to operate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadEnabledState {
    Disabled,
    /// Transient: a join sequence is re-enabling the stack.
    Enabling,
    Enabled,
    Disabling,
}

/// Read-only view of the network state, independent of the control surface.
pub trait NetworkProperties {
    fn device_role(&self) -> DeviceRole;
    fn ip6_is_enabled(&self) -> bool;
    fn partition_id(&self) -> u32;
    fn active_dataset_tlvs(&self) -> Option<DatasetTlvs>;
    fn pending_dataset_tlvs(&self) -> Option<DatasetTlvs>;
}

enum DetachContinuation {
    DisableThread,
    Rejoin { dataset: DatasetTlvs },
    LeaveThen { erase_dataset: bool },
}

pub struct RcpHost {
    config: InstanceConfig,
    enable_auto_attach: bool,
    factory: InstanceFactory,
    instance: Option<Box<dyn InstanceInterface>>,
    helper: ThreadHelper,
    enabled_state: ThreadEnabledState,
    // Deferred receiver invocations, drained once per mainloop pass.
    pending: VecDeque<Box<dyn FnOnce()>>,
    thread_state_callbacks: Vec<ThreadStateChangedCallback>,
    enabled_state_callbacks: Vec<ThreadEnabledStateCallback>,
    reset_handlers: Vec<ResetHandler>,
    srp_handler: Option<SrpAdvertisingHandler>,
    udp_forward_handler: Option<UdpForwardSendHandler>,
    join_receiver: Option<AsyncResultReceiver>,
    set_thread_enabled_receiver: Option<AsyncResultReceiver>,
    migration_receiver: Option<AsyncResultReceiver>,
    leave_receiver: Option<AsyncResultReceiver>,
    detach_continuation: Option<DetachContinuation>,
}

impl RcpHost {
    /// Creates a host backed by the simulated stack; the configuration's
    /// settings blob persists across `reset`.
    pub fn new(config: InstanceConfig, enable_auto_attach: bool) -> Self {
        let settings = Rc::new(RefCell::new(SimSettings::default()));
        let factory: InstanceFactory = Box::new(move |config| {
            Box::new(SimulatedInstance::with_settings(config, settings.clone()))
        });
        RcpHost::with_factory(config, enable_auto_attach, factory)
    }

    /// Creates a host with a custom stack backend.
    pub fn with_factory(
        config: InstanceConfig,
        enable_auto_attach: bool,
        factory: InstanceFactory,
    ) -> Self {
        RcpHost {
            config,
            enable_auto_attach,
            factory,
            instance: None,
            helper: ThreadHelper::new(),
            enabled_state: ThreadEnabledState::Disabled,
            pending: VecDeque::new(),
            thread_state_callbacks: Vec::new(),
            enabled_state_callbacks: Vec::new(),
            reset_handlers: Vec::new(),
            srp_handler: None,
            udp_forward_handler: None,
            join_receiver: None,
            set_thread_enabled_receiver: None,
            migration_receiver: None,
            leave_receiver: None,
            detach_continuation: None,
        }
    }

    pub fn interface_name(&self) -> &str {
        &self.config.interface_name
    }

    /// Initialises the Thread stack and applies the feature configuration.
    pub fn init(&mut self) -> Result<()> {
        if self.instance.is_some() {
            return Err(Error::new(ErrorKind::InvalidState, "Already initialized"));
        }
        self.config.validate()?;

        let mut instance = (self.factory)(&self.config);
        instance.srp_server_set_enabled(true);
        self.instance = Some(instance);

        info!(
            "Thread interface {} initialized (dry run: {})",
            self.config.interface_name, self.config.dry_run
        );

        if self.enable_auto_attach {
            self.auto_attach();
        }
        Ok(())
    }

    /// Tears the stack down; all callback lists and parked receivers are
    /// cleared, parked receivers firing with `Abort` first.
    pub fn deinit(&mut self) {
        self.abort_parked_receivers("OT is being deinitialized");
        if let Some(receiver) = self.set_thread_enabled_receiver.take() {
            self.defer(receiver, Err(Error::new(ErrorKind::Abort, "OT is being deinitialized")));
        }
        if let Some(receiver) = self.leave_receiver.take() {
            self.defer(receiver, Err(Error::new(ErrorKind::Abort, "OT is being deinitialized")));
        }

        self.helper.clear(&mut self.pending);
        self.thread_state_callbacks.clear();
        self.enabled_state_callbacks.clear();
        self.reset_handlers.clear();
        self.detach_continuation = None;
        self.enabled_state = ThreadEnabledState::Disabled;
        self.instance = None;
    }

    /// Re-initialises the stack after an RCP reset and replays the registered
    /// reset handlers.
    pub fn reset(&mut self) -> Result<()> {
        let instance = self
            .instance
            .as_mut()
            .ok_or_else(|| not_initialized())?;
        instance.reset()?;
        instance.srp_server_set_enabled(true);
        self.enabled_state = ThreadEnabledState::Disabled;
        self.detach_continuation = None;

        let mut handlers = std::mem::take(&mut self.reset_handlers);
        for handler in handlers.iter_mut() {
            handler();
        }
        self.reset_handlers = handlers;

        // Auto attach applies for one iteration after a reset.
        self.auto_attach();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.instance.is_some()
    }

    pub fn instance(&self) -> Option<&dyn InstanceInterface> {
        self.instance.as_deref()
    }

    pub fn instance_mut(&mut self) -> Option<&mut (dyn InstanceInterface + 'static)> {
        match self.instance.as_mut() {
            Some(instance) => Some(instance.as_mut()),
            None => None,
        }
    }

    pub fn helper_mut(&mut self) -> &mut ThreadHelper {
        &mut self.helper
    }

    pub fn thread_enabled_state(&self) -> ThreadEnabledState {
        self.enabled_state
    }

    pub fn add_thread_state_changed_callback(&mut self, callback: ThreadStateChangedCallback) {
        self.thread_state_callbacks.push(callback);
    }

    pub fn add_thread_enabled_state_changed_callback(&mut self, callback: ThreadEnabledStateCallback) {
        self.enabled_state_callbacks.push(callback);
    }

    pub fn register_reset_handler(&mut self, handler: ResetHandler) {
        self.reset_handlers.push(handler);
    }

    pub fn set_srp_advertising_handler(&mut self, handler: SrpAdvertisingHandler) {
        self.srp_handler = Some(handler);
    }

    pub fn set_udp_forward_send_handler(&mut self, handler: UdpForwardSendHandler) {
        self.udp_forward_handler = Some(handler);
    }

    /// Completes an SRP update transaction on behalf of the advertising
    /// proxy.
    pub fn srp_server_respond(&mut self, id: u32, result: Result<()>) {
        if let Some(instance) = self.instance.as_mut() {
            instance.srp_server_respond(id, result);
        }
    }

    // ---- Thread control operations ----

    /// Joins the network described by `dataset`, detaching from the current
    /// network first when needed. A join superseding an outstanding one
    /// aborts its predecessor.
    pub fn join(&mut self, dataset: DatasetTlvs, receiver: AsyncResultReceiver) {
        if let Some(previous) = self.join_receiver.take() {
            self.defer(
                previous,
                Err(Error::new(ErrorKind::Abort, "Aborted by a subsequent join")),
            );
        }

        if self.instance.is_none() {
            self.defer(receiver, Err(not_initialized()));
            return;
        }
        match self.enabled_state {
            ThreadEnabledState::Disabling => {
                self.defer(receiver, Err(Error::new(ErrorKind::Busy, "Thread is disabling")));
                return;
            }
            ThreadEnabledState::Enabled | ThreadEnabledState::Enabling => {}
            ThreadEnabledState::Disabled => {
                self.defer(
                    receiver,
                    Err(Error::new(ErrorKind::InvalidState, "Thread is not enabled")),
                );
                return;
            }
        }

        let target = match OperationalDataset::from_tlvs(&dataset) {
            Ok(target) => target,
            Err(err) => {
                self.defer(receiver, Err(err));
                return;
            }
        };

        info!("Starting join...");

        let instance = self.instance.as_mut().expect("instance is initialized");
        let current = instance
            .active_dataset_tlvs()
            .and_then(|tlvs| OperationalDataset::from_tlvs(&tlvs).ok());

        if let Some(current) = current {
            if current.is_same_network(&target) && instance.device_role().is_attached() {
                info!("Already Joined the target network");
                let result = instance.set_active_dataset_tlvs(&dataset);
                self.defer(receiver, result);
                return;
            }
        }

        if instance.device_role() != DeviceRole::Disabled {
            // Graceful detach first; the join restarts from the detach
            // completion.
            self.join_receiver = Some(receiver);
            self.detach_continuation = Some(DetachContinuation::Rejoin { dataset });
            if let Err(err) = instance.detach_gracefully() {
                self.detach_continuation = None;
                if let Some(receiver) = self.join_receiver.take() {
                    self.defer(receiver, Err(err));
                }
            }
            return;
        }

        self.join_receiver = Some(receiver);
        self.continue_join(dataset);
    }

    /// Detaches (when attached) and optionally erases the persisted network
    /// info. Parked join and migration receivers abort.
    pub fn leave(&mut self, erase_dataset: bool, receiver: AsyncResultReceiver) {
        if self.instance.is_none() {
            self.defer(receiver, Err(not_initialized()));
            return;
        }
        if self.enabled_state == ThreadEnabledState::Disabling {
            self.defer(receiver, Err(Error::new(ErrorKind::Busy, "Thread is disabling")));
            return;
        }

        self.abort_parked_receivers("Aborted by leave");

        let instance = self.instance.as_mut().expect("instance is initialized");
        if instance.device_role() == DeviceRole::Disabled {
            let result = if erase_dataset {
                instance.erase_persistent_info()
            } else {
                Ok(())
            };
            self.defer(receiver, result);
            return;
        }

        self.leave_receiver = Some(receiver);
        self.detach_continuation = Some(DetachContinuation::LeaveThen { erase_dataset });
        if let Err(err) = instance.detach_gracefully() {
            self.detach_continuation = None;
            if let Some(receiver) = self.leave_receiver.take() {
                self.defer(receiver, Err(err));
            }
        }
    }

    /// Sends a Management Pending Set to migrate all nodes to `dataset`.
    pub fn schedule_migration(&mut self, dataset: DatasetTlvs, receiver: AsyncResultReceiver) {
        if self.instance.is_none() {
            self.defer(receiver, Err(not_initialized()));
            return;
        }
        if self.migration_receiver.is_some() {
            self.defer(
                receiver,
                Err(Error::new(ErrorKind::Busy, "Another migration is in progress")),
            );
            return;
        }
        if self.enabled_state != ThreadEnabledState::Enabled {
            self.defer(
                receiver,
                Err(Error::new(ErrorKind::InvalidState, "Thread is disabled")),
            );
            return;
        }

        let instance = self.instance.as_mut().expect("instance is initialized");
        if !instance.device_role().is_attached() {
            self.defer(
                receiver,
                Err(Error::new(ErrorKind::InvalidState, "Device is detached")),
            );
            return;
        }

        match instance.send_mgmt_pending_set(&dataset) {
            Ok(()) => self.migration_receiver = Some(receiver),
            Err(err) => self.defer(receiver, Err(err)),
        }
    }

    /// Enables or disables Thread. Disabling detaches gracefully first and
    /// completes once the device role is `Disabled`.
    pub fn set_thread_enabled(&mut self, enabled: bool, receiver: AsyncResultReceiver) {
        if self.instance.is_none() {
            self.defer(receiver, Err(not_initialized()));
            return;
        }
        if self.enabled_state == ThreadEnabledState::Disabling {
            self.defer(receiver, Err(Error::new(ErrorKind::Busy, "Thread is disabling")));
            return;
        }

        if enabled {
            if self.enabled_state == ThreadEnabledState::Enabled {
                self.defer(receiver, Ok(()));
                return;
            }

            let instance = self.instance.as_mut().expect("instance is initialized");
            let has_dataset = instance
                .active_dataset_tlvs()
                .map(|tlvs| !tlvs.is_empty())
                .unwrap_or(false);
            let mut result = Ok(());
            if has_dataset && instance.device_role() == DeviceRole::Disabled {
                result = instance
                    .ip6_set_enabled(true)
                    .and_then(|_| instance.thread_set_enabled(true));
            }
            if result.is_ok() {
                self.update_enabled_state(ThreadEnabledState::Enabled);
            }
            self.defer(receiver, result);
        } else {
            let previous = self.enabled_state;
            self.set_thread_enabled_receiver = Some(receiver);
            self.update_enabled_state(ThreadEnabledState::Disabling);
            self.detach_continuation = Some(DetachContinuation::DisableThread);
            let instance = self.instance.as_mut().expect("instance is initialized");
            if let Err(err) = instance.detach_gracefully() {
                self.detach_continuation = None;
                self.update_enabled_state(previous);
                if let Some(receiver) = self.set_thread_enabled_receiver.take() {
                    self.defer(receiver, Err(err));
                }
            }
        }
    }

    /// Sets the radio region; the code must be exactly two letters.
    pub fn set_country_code(&mut self, country_code: &str, receiver: AsyncResultReceiver) {
        if self.instance.is_none() {
            self.defer(receiver, Err(not_initialized()));
            return;
        }
        if country_code.len() != 2 || !country_code.bytes().all(|b| b.is_ascii_alphabetic()) {
            self.defer(
                receiver,
                Err(Error::new(
                    ErrorKind::InvalidArgs,
                    format!("Invalid country code: {country_code}"),
                )),
            );
            return;
        }

        let instance = self.instance.as_mut().expect("instance is initialized");
        let result = instance.set_region(country_code);
        self.defer(receiver, result);
    }

    /// Reads the supported and preferred channel masks.
    pub fn get_channel_masks(
        &mut self,
        receiver: ChannelMasksReceiver,
        error_receiver: AsyncResultReceiver,
    ) {
        let masks = self
            .instance
            .as_ref()
            .map(|instance| (instance.supported_channel_mask(), instance.preferred_channel_mask()));
        match masks {
            Some((supported, preferred)) => self
                .pending
                .push_back(Box::new(move || receiver(supported, preferred))),
            None => self.defer(error_receiver, Err(not_initialized())),
        }
    }

    /// Applies per-channel maximum transmit powers. Channels must lie in the
    /// IEEE 802.15.4 2.4 GHz band; one invalid pair fails the whole call.
    pub fn set_channel_max_powers(
        &mut self,
        powers: &[ChannelMaxPower],
        receiver: AsyncResultReceiver,
    ) {
        if self.instance.is_none() {
            self.defer(receiver, Err(not_initialized()));
            return;
        }
        if powers.iter().any(|p| p.channel < 11 || p.channel > 26) {
            self.defer(
                receiver,
                Err(Error::new(ErrorKind::InvalidArgs, "Invalid channel")),
            );
            return;
        }

        let instance = self.instance.as_mut().expect("instance is initialized");
        let mut result = Ok(());
        for power in powers {
            if let Err(err) = instance.set_channel_max_power(*power) {
                result = Err(err);
                break;
            }
        }
        self.defer(receiver, result);
    }

    // ---- helper-backed operations ----

    pub fn active_scan(&mut self, receiver: crate::thread_helper::ScanResultsReceiver) {
        let RcpHost {
            instance,
            helper,
            pending,
            ..
        } = self;
        match instance.as_mut() {
            Some(instance) => helper.start_active_scan(instance.as_mut(), receiver, pending),
            None => pending.push_back(Box::new(move || receiver(Err(not_initialized())))),
        }
    }

    pub fn energy_scan(
        &mut self,
        duration: std::time::Duration,
        receiver: crate::thread_helper::EnergyScanResultsReceiver,
    ) {
        let RcpHost {
            instance,
            helper,
            pending,
            ..
        } = self;
        match instance.as_mut() {
            Some(instance) => helper.start_energy_scan(instance.as_mut(), duration, receiver, pending),
            None => pending.push_back(Box::new(move || receiver(Err(not_initialized())))),
        }
    }

    pub fn attach(
        &mut self,
        args: Option<crate::thread_helper::AttachArgs>,
        receiver: AsyncResultReceiver,
    ) {
        let RcpHost {
            instance,
            helper,
            pending,
            ..
        } = self;
        match instance.as_mut() {
            Some(instance) => helper.attach(instance.as_mut(), args, receiver, pending),
            None => pending.push_back(Box::new(move || receiver(Err(not_initialized())))),
        }
    }

    /// Migrates every node to `dataset` after the standard delay timer; the
    /// outcome arrives like a `schedule_migration` result.
    pub fn attach_all_nodes_to(&mut self, dataset: DatasetTlvs, receiver: AsyncResultReceiver) {
        match ThreadHelper::compose_migration_dataset(&dataset) {
            Ok(pending_dataset) => self.schedule_migration(pending_dataset, receiver),
            Err(err) => self.defer(receiver, Err(err)),
        }
    }

    pub fn detach(&mut self) -> Result<()> {
        let RcpHost {
            instance,
            helper,
            pending,
            ..
        } = self;
        match instance.as_mut() {
            Some(instance) => helper.detach(instance.as_mut(), pending),
            None => Err(not_initialized()),
        }
    }

    pub fn joiner_start(
        &mut self,
        joiner_info: &crate::ot::JoinerStartInfo,
        receiver: AsyncResultReceiver,
    ) {
        let RcpHost {
            instance,
            helper,
            pending,
            ..
        } = self;
        match instance.as_mut() {
            Some(instance) => helper.joiner_start(instance.as_mut(), joiner_info, receiver, pending),
            None => pending.push_back(Box::new(move || receiver(Err(not_initialized())))),
        }
    }

    pub fn joiner_stop(&mut self) {
        let RcpHost {
            instance,
            helper,
            pending,
            ..
        } = self;
        if let Some(instance) = instance.as_mut() {
            helper.joiner_stop(instance.as_mut(), pending);
        }
    }

    pub fn add_device_role_handler(&mut self, handler: crate::thread_helper::DeviceRoleHandler) {
        self.helper.add_device_role_handler(handler);
    }

    pub fn add_active_dataset_change_handler(
        &mut self,
        handler: crate::thread_helper::DatasetChangeHandler,
    ) {
        self.helper.add_active_dataset_change_handler(handler);
    }

    // ---- internals ----

    fn auto_attach(&mut self) {
        let instance = match self.instance.as_mut() {
            Some(instance) => instance,
            None => return,
        };
        let has_dataset = instance
            .active_dataset_tlvs()
            .map(|tlvs| !tlvs.is_empty())
            .unwrap_or(false);
        if !has_dataset {
            return;
        }

        let result = instance
            .ip6_set_enabled(true)
            .and_then(|_| instance.thread_set_enabled(true));
        match result {
            Ok(()) => self.update_enabled_state(ThreadEnabledState::Enabled),
            Err(err) => warn!("Failed to auto-attach: {err}"),
        }
    }

    fn continue_join(&mut self, dataset: DatasetTlvs) {
        self.update_enabled_state(ThreadEnabledState::Enabling);

        let instance = match self.instance.as_mut() {
            Some(instance) => instance,
            None => return,
        };
        let result = instance
            .set_active_dataset_tlvs(&dataset)
            .and_then(|_| instance.ip6_set_enabled(true))
            .and_then(|_| instance.thread_set_enabled(true));

        match result {
            Ok(()) => {
                // Parked until the next role change reports attachment.
                self.update_enabled_state(ThreadEnabledState::Enabled);
            }
            Err(err) => {
                self.update_enabled_state(ThreadEnabledState::Enabled);
                if let Some(receiver) = self.join_receiver.take() {
                    self.defer(receiver, Err(err));
                }
            }
        }
    }

    fn abort_parked_receivers(&mut self, message: &str) {
        if let Some(receiver) = self.join_receiver.take() {
            self.defer(receiver, Err(Error::new(ErrorKind::Abort, message)));
        }
        if let Some(receiver) = self.migration_receiver.take() {
            self.defer(receiver, Err(Error::new(ErrorKind::Abort, message)));
        }
    }

    fn update_enabled_state(&mut self, state: ThreadEnabledState) {
        if self.enabled_state == state {
            return;
        }
        info!("Thread enabled state: {:?} -> {state:?}", self.enabled_state);
        self.enabled_state = state;
        for callback in self.enabled_state_callbacks.iter_mut() {
            callback(state);
        }
    }

    fn defer(&mut self, receiver: AsyncResultReceiver, result: Result<()>) {
        self.pending.push_back(Box::new(move || receiver(result)));
    }

    fn handle_detach_done(&mut self) {
        match self.detach_continuation.take() {
            None => {}
            Some(DetachContinuation::DisableThread) => {
                let instance = match self.instance.as_mut() {
                    Some(instance) => instance,
                    None => return,
                };
                let result = instance
                    .thread_set_enabled(false)
                    .and_then(|_| instance.ip6_set_enabled(false));
                self.update_enabled_state(ThreadEnabledState::Disabled);
                self.abort_parked_receivers("Thread is disabled");
                if let Some(receiver) = self.set_thread_enabled_receiver.take() {
                    self.defer(receiver, result);
                }
            }
            Some(DetachContinuation::Rejoin { dataset }) => {
                if let Some(instance) = self.instance.as_mut() {
                    if let Err(err) = instance.erase_persistent_info() {
                        warn!("Failed to erase persistent info before rejoining: {err}");
                    }
                }
                self.continue_join(dataset);
            }
            Some(DetachContinuation::LeaveThen { erase_dataset }) => {
                let instance = match self.instance.as_mut() {
                    Some(instance) => instance,
                    None => return,
                };
                let result = if erase_dataset {
                    instance.erase_persistent_info()
                } else {
                    Ok(())
                };
                if let Some(receiver) = self.leave_receiver.take() {
                    self.defer(receiver, result);
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::StateChanged(flags) => {
                if flags.contains(ChangedFlags::THREAD_ROLE) {
                    let role = self
                        .instance
                        .as_ref()
                        .map(|instance| instance.device_role())
                        .unwrap_or(DeviceRole::Disabled);
                    if role.is_attached() {
                        if let Some(receiver) = self.join_receiver.take() {
                            info!("Join succeeded");
                            self.defer(receiver, Ok(()));
                        }
                    }
                }

                if let Some(instance) = self.instance.as_mut() {
                    self.helper
                        .handle_state_changed(flags, instance.as_mut(), &mut self.pending);
                    for callback in self.thread_state_callbacks.iter_mut() {
                        callback(flags, instance.as_mut());
                    }
                }
            }
            Event::DetachGracefullyDone => self.handle_detach_done(),
            Event::ScanDone(result) => self.helper.handle_scan_done(result, &mut self.pending),
            Event::EnergyScanDone(result) => {
                self.helper.handle_energy_scan_done(result, &mut self.pending)
            }
            Event::MgmtPendingSetDone(result) => {
                if let Some(receiver) = self.migration_receiver.take() {
                    self.defer(receiver, result);
                }
            }
            Event::JoinerDone(result) => {
                if let Some(instance) = self.instance.as_mut() {
                    self.helper
                        .handle_joiner_done(result, instance.as_mut(), &mut self.pending);
                }
            }
            Event::SrpServerUpdate(update) => {
                let RcpHost {
                    instance,
                    srp_handler,
                    ..
                } = self;
                if let (Some(instance), Some(handler)) = (instance.as_mut(), srp_handler.as_mut())
                {
                    handler(instance.as_mut(), update);
                }
            }
            Event::UdpForwardSend {
                payload,
                peer_addr,
                peer_port,
                thread_port,
            } => {
                if let Some(handler) = self.udp_forward_handler.as_mut() {
                    handler(&payload, peer_addr, peer_port, thread_port);
                }
            }
        }
    }
}

impl NetworkProperties for RcpHost {
    fn device_role(&self) -> DeviceRole {
        self.instance
            .as_ref()
            .map(|instance| instance.device_role())
            .unwrap_or(DeviceRole::Disabled)
    }

    fn ip6_is_enabled(&self) -> bool {
        self.instance
            .as_ref()
            .map(|instance| instance.ip6_is_enabled())
            .unwrap_or(false)
    }

    fn partition_id(&self) -> u32 {
        self.instance
            .as_ref()
            .map(|instance| instance.partition_id())
            .unwrap_or(0)
    }

    fn active_dataset_tlvs(&self) -> Option<DatasetTlvs> {
        self.instance
            .as_ref()
            .and_then(|instance| instance.active_dataset_tlvs())
    }

    fn pending_dataset_tlvs(&self) -> Option<DatasetTlvs> {
        self.instance
            .as_ref()
            .and_then(|instance| instance.pending_dataset_tlvs())
    }
}

impl MainloopProcessor for RcpHost {
    fn update(&mut self, context: &mut MainloopContext) {
        if let Some(instance) = self.instance.as_mut() {
            instance.update(context);
        }
        if !self.pending.is_empty() {
            context.set_timeout_if_earlier(std::time::Duration::from_millis(0));
        }
    }

    fn process(&mut self, context: &MainloopContext) {
        if let Some(instance) = self.instance.as_mut() {
            instance.process(context);
        }

        loop {
            let event = match self.instance.as_mut() {
                Some(instance) => instance.poll_event(),
                None => None,
            };
            match event {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }

        while let Some(deferred) = self.pending.pop_front() {
            deferred();
        }
    }
}

fn not_initialized() -> Error {
    Error::new(ErrorKind::InvalidState, "OT is not initialized")
}
