use std::cell::RefCell;
use std::convert::TryFrom;
use std::rc::Rc;
use std::time::{Duration, Instant};

use otbr_agent_rs::ot::{ChannelMaxPower, DatasetTlvs, DeviceRole, InstanceConfig, OperationalDataset};
use otbr_agent_rs::rcp_host::{NetworkProperties, RcpHost, ThreadEnabledState};
use otbr_agent_rs::{ErrorKind, MainloopManager};

type ResultSlot = Rc<RefCell<Option<otbr_agent_rs::Result<()>>>>;

fn result_slot() -> ResultSlot {
    Rc::new(RefCell::new(None))
}

fn receiver_for(slot: &ResultSlot) -> Box<dyn FnOnce(otbr_agent_rs::Result<()>)> {
    let slot = slot.clone();
    Box::new(move |result| {
        *slot.borrow_mut() = Some(result);
    })
}

fn process_until(manager: &mut MainloopManager, timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() && Instant::now() < deadline {
        manager.poll(Duration::from_millis(10)).unwrap();
    }
}

fn new_host(manager: &mut MainloopManager) -> Rc<RefCell<RcpHost>> {
    let config = InstanceConfig {
        interface_name: "wpan0".to_owned(),
        radio_urls: Vec::new(),
        backbone_interface_name: None,
        dry_run: true,
    };
    let host = Rc::new(RefCell::new(RcpHost::new(config, false)));
    manager.add_processor(host.clone());
    host
}

fn provision_and_start(host: &Rc<RefCell<RcpHost>>) -> DatasetTlvs {
    let mut host = host.borrow_mut();
    let instance = host.instance_mut().unwrap();
    let dataset = instance.create_new_network_dataset().unwrap();
    let tlvs = dataset.to_tlvs().unwrap();
    instance.set_active_dataset_tlvs(&tlvs).unwrap();
    instance.ip6_set_enabled(true).unwrap();
    instance.thread_set_enabled(true).unwrap();
    tlvs
}

#[test]
fn test_device_role_changes_correctly_after_set_thread_enabled() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut manager = MainloopManager::new();
    let host = new_host(&mut manager);
    host.borrow_mut().init().unwrap();

    let enabled_state = Rc::new(RefCell::new(None));
    let state_slot = enabled_state.clone();
    host.borrow_mut()
        .add_thread_enabled_state_changed_callback(Box::new(move |state| {
            *state_slot.borrow_mut() = Some(state);
        }));

    // 1. No active dataset: enabling succeeds with the role still disabled.
    let result = result_slot();
    host.borrow_mut().set_thread_enabled(true, receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });
    assert_eq!(*result.borrow(), Some(Ok(())));
    assert_eq!(host.borrow().device_role(), DeviceRole::Disabled);
    assert_eq!(*enabled_state.borrow(), Some(ThreadEnabledState::Enabled));

    // 2. Set an active dataset and bring the stack up through the stack APIs.
    provision_and_start(&host);
    process_until(&mut manager, Duration::from_secs(1), || {
        host.borrow().device_role() == DeviceRole::Leader
    });
    assert_eq!(host.borrow().device_role(), DeviceRole::Leader);

    // 3. A second enable is a no-op success.
    let result = result_slot();
    host.borrow_mut().set_thread_enabled(true, receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });
    assert_eq!(*result.borrow(), Some(Ok(())));
    assert_eq!(*enabled_state.borrow(), Some(ThreadEnabledState::Enabled));

    // 4. Disabling transitions immediately and completes with role disabled.
    let result = result_slot();
    host.borrow_mut().set_thread_enabled(false, receiver_for(&result));
    assert_eq!(*enabled_state.borrow(), Some(ThreadEnabledState::Disabling));
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });
    assert_eq!(*result.borrow(), Some(Ok(())));
    assert_eq!(host.borrow().device_role(), DeviceRole::Disabled);
    assert_eq!(*enabled_state.borrow(), Some(ThreadEnabledState::Disabled));

    // 5. A concurrent second disable fails busy; the first still succeeds.
    let first = result_slot();
    let second = result_slot();
    host.borrow_mut().set_thread_enabled(false, receiver_for(&first));
    host.borrow_mut().set_thread_enabled(false, receiver_for(&second));
    process_until(&mut manager, Duration::from_secs(1), || {
        first.borrow().is_some() && second.borrow().is_some()
    });
    assert_eq!(*first.borrow(), Some(Ok(())));
    assert_eq!(
        second.borrow().as_ref().unwrap().as_ref().unwrap_err().kind(),
        ErrorKind::Busy
    );
    assert_eq!(*enabled_state.borrow(), Some(ThreadEnabledState::Disabled));

    host.borrow_mut().deinit();
}

#[test]
fn test_set_country_code_works_correctly() {
    let mut manager = MainloopManager::new();
    let host = new_host(&mut manager);

    // 1. Before init any input fails with invalid state.
    let result = result_slot();
    host.borrow_mut().set_country_code("AF", receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });
    {
        let slot = result.borrow();
        let err = slot.as_ref().unwrap().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.message(), "OT is not initialized");
    }

    host.borrow_mut().init().unwrap();

    // 2. Malformed region codes.
    for bad in ["AFA", "A", "12"] {
        let result = result_slot();
        host.borrow_mut().set_country_code(bad, receiver_for(&result));
        process_until(&mut manager, Duration::from_secs(1), || {
            result.borrow().is_some()
        });
        assert_eq!(
            result.borrow().as_ref().unwrap().as_ref().unwrap_err().kind(),
            ErrorKind::InvalidArgs
        );
    }

    // 3. Valid input reaches the platform setter, which has no regulatory
    // support in the simulated radio.
    let result = result_slot();
    host.borrow_mut().set_country_code("AF", receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });
    assert_eq!(
        result.borrow().as_ref().unwrap().as_ref().unwrap_err().kind(),
        ErrorKind::NotImplemented
    );

    host.borrow_mut().deinit();
}

#[test]
fn test_state_changes_correctly_after_schedule_migration() {
    let mut manager = MainloopManager::new();
    let host = new_host(&mut manager);

    let empty_tlvs = DatasetTlvs::try_from(&[][..]).unwrap();

    // 1. Before init.
    let result = result_slot();
    host.borrow_mut()
        .schedule_migration(empty_tlvs.clone(), receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });
    {
        let slot = result.borrow();
        let err = slot.as_ref().unwrap().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.message(), "OT is not initialized");
    }

    host.borrow_mut().init().unwrap();

    // 2. Thread disabled.
    let result = result_slot();
    host.borrow_mut()
        .schedule_migration(empty_tlvs, receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });
    {
        let slot = result.borrow();
        let err = slot.as_ref().unwrap().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.message(), "Thread is disabled");
    }

    // 3. Enabled and attached: migration succeeds.
    let tlvs = provision_and_start(&host);
    let result = result_slot();
    host.borrow_mut().set_thread_enabled(true, receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(1), || {
        host.borrow().device_role() == DeviceRole::Leader
    });
    assert_eq!(host.borrow().device_role(), DeviceRole::Leader);

    let migration = OperationalDataset::from_tlvs(&tlvs).unwrap();
    let migration_tlvs = migration.to_tlvs().unwrap();
    let result = result_slot();
    host.borrow_mut()
        .schedule_migration(migration_tlvs, receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });
    assert_eq!(*result.borrow(), Some(Ok(())));

    host.borrow_mut().deinit();
}

#[test]
fn test_join_applies_dataset_and_leave_erases_it() {
    let mut manager = MainloopManager::new();
    let host = new_host(&mut manager);
    host.borrow_mut().init().unwrap();

    // Thread must be enabled before a join is accepted.
    let result = result_slot();
    host.borrow_mut().set_thread_enabled(true, receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });
    assert_eq!(*result.borrow(), Some(Ok(())));

    let target = {
        let mut host = host.borrow_mut();
        let instance = host.instance_mut().unwrap();
        instance.create_new_network_dataset().unwrap()
    };
    let target_tlvs = target.to_tlvs().unwrap();

    let result = result_slot();
    host.borrow_mut().join(target_tlvs.clone(), receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(2), || {
        result.borrow().is_some()
    });
    assert_eq!(*result.borrow(), Some(Ok(())));
    assert!(host.borrow().device_role().is_attached());

    // The applied dataset identifies the requested network.
    let active = host.borrow().active_dataset_tlvs().unwrap();
    let active = OperationalDataset::from_tlvs(&active).unwrap();
    assert_eq!(active.channel, target.channel);
    assert_eq!(active.network_key, target.network_key);
    assert_eq!(active.ext_pan_id, target.ext_pan_id);

    // Joining the same network while attached completes without detaching.
    let result = result_slot();
    host.borrow_mut().join(target_tlvs, receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });
    assert_eq!(*result.borrow(), Some(Ok(())));
    assert!(host.borrow().device_role().is_attached());

    // Leave with dataset erase.
    let result = result_slot();
    host.borrow_mut().leave(true, receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(2), || {
        result.borrow().is_some()
    });
    assert_eq!(*result.borrow(), Some(Ok(())));
    assert_eq!(host.borrow().device_role(), DeviceRole::Disabled);
    assert!(host.borrow().active_dataset_tlvs().is_none());

    host.borrow_mut().deinit();
}

#[test]
fn test_join_aborts_outstanding_join() {
    let mut manager = MainloopManager::new();
    let host = new_host(&mut manager);
    host.borrow_mut().init().unwrap();

    let result = result_slot();
    host.borrow_mut().set_thread_enabled(true, receiver_for(&result));
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });

    let (first_tlvs, second_tlvs) = {
        let mut host = host.borrow_mut();
        let instance = host.instance_mut().unwrap();
        (
            instance.create_new_network_dataset().unwrap().to_tlvs().unwrap(),
            instance.create_new_network_dataset().unwrap().to_tlvs().unwrap(),
        )
    };

    let first = result_slot();
    let second = result_slot();
    host.borrow_mut().join(first_tlvs, receiver_for(&first));
    host.borrow_mut().join(second_tlvs, receiver_for(&second));

    process_until(&mut manager, Duration::from_secs(2), || {
        first.borrow().is_some() && second.borrow().is_some()
    });

    assert_eq!(
        first.borrow().as_ref().unwrap().as_ref().unwrap_err().kind(),
        ErrorKind::Abort
    );
    assert_eq!(*second.borrow(), Some(Ok(())));

    host.borrow_mut().deinit();
}

#[test]
fn test_get_channel_masks_and_channel_max_powers() {
    let mut manager = MainloopManager::new();
    let host = new_host(&mut manager);
    host.borrow_mut().init().unwrap();

    let masks = Rc::new(RefCell::new(None));
    let masks_slot = masks.clone();
    let error = result_slot();
    host.borrow_mut().get_channel_masks(
        Box::new(move |supported, preferred| {
            *masks_slot.borrow_mut() = Some((supported, preferred));
        }),
        receiver_for(&error),
    );
    process_until(&mut manager, Duration::from_secs(1), || {
        masks.borrow().is_some()
    });
    let (supported, preferred) = masks.borrow().unwrap();
    assert_eq!(supported, 0x07ff_f800);
    assert_eq!(preferred, 0x07ff_f800);

    // Valid power entries apply in order.
    let result = result_slot();
    host.borrow_mut().set_channel_max_powers(
        &[
            ChannelMaxPower {
                channel: 11,
                max_power: 10,
            },
            ChannelMaxPower {
                channel: 26,
                max_power: 7,
            },
        ],
        receiver_for(&result),
    );
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });
    assert_eq!(*result.borrow(), Some(Ok(())));

    // One out-of-band channel fails the whole call.
    let result = result_slot();
    host.borrow_mut().set_channel_max_powers(
        &[
            ChannelMaxPower {
                channel: 11,
                max_power: 10,
            },
            ChannelMaxPower {
                channel: 27,
                max_power: 7,
            },
        ],
        receiver_for(&result),
    );
    process_until(&mut manager, Duration::from_secs(1), || {
        result.borrow().is_some()
    });
    assert_eq!(
        result.borrow().as_ref().unwrap().as_ref().unwrap_err().kind(),
        ErrorKind::InvalidArgs
    );

    host.borrow_mut().deinit();
}
