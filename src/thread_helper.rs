//! Thread operation helpers layered over the stack instance.
//!
//! Scan, attach and joiner flows park their receivers here until the stack
//! reports completion through the host's event loop. The helper never owns
//! the instance; the host passes it in for each call.

use std::collections::VecDeque;

use log::{info, warn};
use rand::{thread_rng, Rng};

use crate::error::{Error, ErrorKind, Result};
use crate::ot::{
    ActiveScanResult, DatasetTlvs, DeviceRole, EnergyScanResult, InstanceInterface,
    JoinerStartInfo, OperationalDataset,
};

/// Delay timer applied when migrating all nodes to a new dataset.
pub const ATTACH_ALL_NODES_DELAY_MS: u32 = 300_000;

pub type ScanResultsReceiver = Box<dyn FnOnce(Result<Vec<ActiveScanResult>>)>;
pub type EnergyScanResultsReceiver = Box<dyn FnOnce(Result<Vec<EnergyScanResult>>)>;
pub type AttachReceiver = Box<dyn FnOnce(Result<()>)>;
pub type DeviceRoleHandler = Box<dyn FnMut(DeviceRole)>;
pub type DatasetChangeHandler = Box<dyn FnMut(&DatasetTlvs)>;

type Deferred = VecDeque<Box<dyn FnOnce()>>;

/// Explicit network parameters for an attach request; anything left to the
/// stack comes from a freshly generated dataset.
#[derive(Debug, Clone)]
pub struct AttachArgs {
    pub network_name: String,
    pub pan_id: u16,
    pub ext_pan_id: u64,
    pub network_key: Vec<u8>,
    pub pskc: Vec<u8>,
    pub channel_mask: u32,
}

pub struct ThreadHelper {
    scan_receiver: Option<ScanResultsReceiver>,
    energy_scan_receiver: Option<EnergyScanResultsReceiver>,
    attach_receiver: Option<AttachReceiver>,
    joiner_receiver: Option<AttachReceiver>,
    device_role_handlers: Vec<DeviceRoleHandler>,
    dataset_change_handlers: Vec<DatasetChangeHandler>,
}

impl ThreadHelper {
    pub fn new() -> Self {
        ThreadHelper {
            scan_receiver: None,
            energy_scan_receiver: None,
            attach_receiver: None,
            joiner_receiver: None,
            device_role_handlers: Vec::new(),
            dataset_change_handlers: Vec::new(),
        }
    }

    pub fn add_device_role_handler(&mut self, handler: DeviceRoleHandler) {
        self.device_role_handlers.push(handler);
    }

    pub fn add_active_dataset_change_handler(&mut self, handler: DatasetChangeHandler) {
        self.dataset_change_handlers.push(handler);
    }

    pub fn start_active_scan(
        &mut self,
        instance: &mut dyn InstanceInterface,
        receiver: ScanResultsReceiver,
        deferred: &mut Deferred,
    ) {
        if self.scan_receiver.is_some() {
            let err = Error::new(ErrorKind::Busy, "Scan in progress");
            deferred.push_back(Box::new(move || receiver(Err(err))));
            return;
        }
        match instance.active_scan(0, std::time::Duration::from_millis(300)) {
            Ok(()) => self.scan_receiver = Some(receiver),
            Err(err) => deferred.push_back(Box::new(move || receiver(Err(err)))),
        }
    }

    pub fn start_energy_scan(
        &mut self,
        instance: &mut dyn InstanceInterface,
        duration: std::time::Duration,
        receiver: EnergyScanResultsReceiver,
        deferred: &mut Deferred,
    ) {
        if self.energy_scan_receiver.is_some() {
            let err = Error::new(ErrorKind::Busy, "Scan in progress");
            deferred.push_back(Box::new(move || receiver(Err(err))));
            return;
        }
        match instance.energy_scan(0, duration) {
            Ok(()) => self.energy_scan_receiver = Some(receiver),
            Err(err) => deferred.push_back(Box::new(move || receiver(Err(err)))),
        }
    }

    /// Attaches to the network described by `args`, or to a freshly
    /// generated network when `args` is `None`.
    pub fn attach(
        &mut self,
        instance: &mut dyn InstanceInterface,
        args: Option<AttachArgs>,
        receiver: AttachReceiver,
        deferred: &mut Deferred,
    ) {
        if self.attach_receiver.is_some() {
            defer(
                deferred,
                receiver,
                Err(Error::new(ErrorKind::Busy, "Another attach is in progress")),
            );
            return;
        }

        let result = build_attach_dataset(instance, args)
            .and_then(|dataset| dataset.to_tlvs())
            .and_then(|tlvs| instance.set_active_dataset_tlvs(&tlvs))
            .and_then(|_| instance.ip6_set_enabled(true))
            .and_then(|_| instance.thread_set_enabled(true));

        match result {
            Err(err) => defer(deferred, receiver, Err(err)),
            Ok(()) => {
                if instance.device_role().is_attached() {
                    defer(deferred, receiver, Ok(()));
                } else {
                    self.attach_receiver = Some(receiver);
                }
            }
        }
    }

    /// Composes the pending dataset used to pull every node onto `dataset`
    /// after the standard migration delay.
    pub fn compose_migration_dataset(dataset: &DatasetTlvs) -> Result<DatasetTlvs> {
        let mut parsed = OperationalDataset::from_tlvs(dataset)?;
        let active_timestamp = parsed.active_timestamp.unwrap_or(1);
        parsed.pending_timestamp = Some(active_timestamp + 1);
        parsed.delay_ms = Some(ATTACH_ALL_NODES_DELAY_MS);
        parsed.to_tlvs()
    }

    /// Stops Thread and brings the IPv6 interface down. An outstanding
    /// attach aborts.
    pub fn detach(
        &mut self,
        instance: &mut dyn InstanceInterface,
        deferred: &mut Deferred,
    ) -> Result<()> {
        instance.thread_set_enabled(false)?;
        instance.ip6_set_enabled(false)?;
        if let Some(receiver) = self.attach_receiver.take() {
            defer(deferred, receiver, Err(Error::new(ErrorKind::Abort, "Aborted by detach")));
        }
        Ok(())
    }

    pub fn joiner_start(
        &mut self,
        instance: &mut dyn InstanceInterface,
        joiner_info: &JoinerStartInfo,
        receiver: AttachReceiver,
        deferred: &mut Deferred,
    ) {
        if self.joiner_receiver.is_some() {
            defer(
                deferred,
                receiver,
                Err(Error::new(ErrorKind::Busy, "Joiner session in progress")),
            );
            return;
        }
        match instance.joiner_start(joiner_info) {
            Ok(()) => self.joiner_receiver = Some(receiver),
            Err(err) => defer(deferred, receiver, Err(err)),
        }
    }

    pub fn joiner_stop(&mut self, instance: &mut dyn InstanceInterface, deferred: &mut Deferred) {
        instance.joiner_stop();
        if let Some(receiver) = self.joiner_receiver.take() {
            defer(deferred, receiver, Err(Error::new(ErrorKind::Abort, "Joiner stopped")));
        }
    }

    pub(crate) fn handle_state_changed(
        &mut self,
        flags: crate::ot::ChangedFlags,
        instance: &mut dyn InstanceInterface,
        deferred: &mut Deferred,
    ) {
        if flags.contains(crate::ot::ChangedFlags::THREAD_ROLE) {
            let role = instance.device_role();
            for handler in self.device_role_handlers.iter_mut() {
                handler(role);
            }
            if role.is_attached() {
                if let Some(receiver) = self.attach_receiver.take() {
                    info!("Attach succeeded");
                    defer(deferred, receiver, Ok(()));
                }
            }
        }

        if flags.contains(crate::ot::ChangedFlags::ACTIVE_DATASET) {
            if let Some(tlvs) = instance.active_dataset_tlvs() {
                for handler in self.dataset_change_handlers.iter_mut() {
                    handler(&tlvs);
                }
            }
        }
    }

    pub(crate) fn handle_scan_done(
        &mut self,
        result: Result<Vec<ActiveScanResult>>,
        deferred: &mut Deferred,
    ) {
        if let Some(receiver) = self.scan_receiver.take() {
            deferred.push_back(Box::new(move || receiver(result)));
        }
    }

    pub(crate) fn handle_energy_scan_done(
        &mut self,
        result: Result<Vec<EnergyScanResult>>,
        deferred: &mut Deferred,
    ) {
        if let Some(receiver) = self.energy_scan_receiver.take() {
            deferred.push_back(Box::new(move || receiver(result)));
        }
    }

    pub(crate) fn handle_joiner_done(
        &mut self,
        result: Result<()>,
        instance: &mut dyn InstanceInterface,
        deferred: &mut Deferred,
    ) {
        let receiver = match self.joiner_receiver.take() {
            Some(receiver) => receiver,
            None => return,
        };
        let result = match result {
            Ok(()) => instance.thread_set_enabled(true),
            Err(err) => {
                warn!("Joiner failed: {err}");
                Err(err)
            }
        };
        defer(deferred, receiver, result);
    }

    /// Aborts every parked receiver and forgets registered handlers.
    pub(crate) fn clear(&mut self, deferred: &mut Deferred) {
        if let Some(receiver) = self.attach_receiver.take() {
            defer(deferred, receiver, Err(ErrorKind::Abort.into()));
        }
        if let Some(receiver) = self.joiner_receiver.take() {
            defer(deferred, receiver, Err(ErrorKind::Abort.into()));
        }
        if let Some(receiver) = self.scan_receiver.take() {
            deferred.push_back(Box::new(move || receiver(Err(ErrorKind::Abort.into()))));
        }
        if let Some(receiver) = self.energy_scan_receiver.take() {
            deferred.push_back(Box::new(move || receiver(Err(ErrorKind::Abort.into()))));
        }
        self.device_role_handlers.clear();
        self.dataset_change_handlers.clear();
    }
}

impl Default for ThreadHelper {
    fn default() -> Self {
        ThreadHelper::new()
    }
}

fn defer(deferred: &mut Deferred, receiver: AttachReceiver, result: Result<()>) {
    deferred.push_back(Box::new(move || receiver(result)));
}

fn build_attach_dataset(
    instance: &mut dyn InstanceInterface,
    args: Option<AttachArgs>,
) -> Result<OperationalDataset> {
    let mut dataset = instance.create_new_network_dataset()?;

    let args = match args {
        Some(args) => args,
        None => return Ok(dataset),
    };

    if args.network_key.len() != 16 {
        return Err(Error::new(ErrorKind::InvalidArgs, "Network key must be 16 bytes"));
    }
    let mut network_key = [0u8; 16];
    network_key.copy_from_slice(&args.network_key);
    dataset.network_key = Some(network_key);

    if !args.pskc.is_empty() {
        if args.pskc.len() != 16 {
            return Err(Error::new(ErrorKind::InvalidArgs, "PSKc must be 16 bytes"));
        }
        let mut pskc = [0u8; 16];
        pskc.copy_from_slice(&args.pskc);
        dataset.pskc = Some(pskc);
    }

    dataset.network_name = Some(args.network_name);
    dataset.pan_id = Some(args.pan_id);
    dataset.ext_pan_id = Some(args.ext_pan_id.to_be_bytes());

    let mask = args.channel_mask & instance.supported_channel_mask();
    let channels: Vec<u16> = (11..=26).filter(|c| mask & (1u32 << c) != 0).collect();
    if channels.is_empty() {
        return Err(Error::new(ErrorKind::InvalidArgs, "Empty channel mask"));
    }
    dataset.channel = Some(channels[thread_rng().gen_range(0..channels.len())]);
    dataset.channel_mask = Some(mask);

    Ok(dataset)
}
