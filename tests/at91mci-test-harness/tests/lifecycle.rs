//! Host properties, bus timing and detach.

use at91mci::{
    BridgeError, BusWidth, Card, HostCaps, Ivar, IvarValue, Platform, RegisterBlock, SocVariant,
    Tunables,
};
use at91mci_hw::mmio::mci::{self, registers::*};
use mci_test_helpers::{CARD_SIZE, Rig, read_block};
use std::sync::Arc;

#[test]
fn test_host_limits() {
    let rig = Rig::new(SocVariant::Sam9260);
    let host = rig.controller.host();
    assert_eq!(host.f_min, 375_000);
    assert_eq!(host.f_max, 25_000_000);
    assert_eq!(
        rig.controller.read_ivar(Ivar::MaxData),
        Ok(IvarValue::MaxData(1))
    );
    assert_eq!(
        rig.controller.read_ivar(Ivar::FMin),
        Ok(IvarValue::FMin(375_000))
    );
    assert!(!rig.controller.get_ro());
}

#[test]
fn test_slow_master_clock_caps_f_max() {
    let sim = at91mci::Simulator::new(SocVariant::Rm9200, Card::in_memory(CARD_SIZE));
    let controller = at91mci::Controller::attach(
        1,
        Platform::new(SocVariant::Rm9200, 40_000_000),
        Tunables::new(false, true),
        sim.registers(),
        sim.dma(),
    );
    assert_eq!(controller.host().f_max, 20_000_000);
    assert_eq!(controller.unit(), 1);
}

#[test]
fn test_fixed_properties_are_read_only() {
    let rig = Rig::new(SocVariant::Sam9260);
    for value in [
        IvarValue::FMin(1),
        IvarValue::FMax(1),
        IvarValue::HostOcr(0),
        IvarValue::Caps(HostCaps::empty()),
        IvarValue::MaxData(8),
    ] {
        assert_eq!(
            rig.controller.write_ivar(value),
            Err(BridgeError::ReadOnly(value.ivar()))
        );
    }
    assert_eq!(rig.controller.host().f_max, 25_000_000);

    rig.controller
        .write_ivar(IvarValue::Vdd(21))
        .expect("vdd is writable");
    assert_eq!(rig.controller.read_ivar(Ivar::Vdd), Ok(IvarValue::Vdd(21)));
}

#[test]
fn test_caps_follow_four_wire_setting() {
    let rig = Rig::new(SocVariant::Sam9260);
    let caps = || match rig.controller.read_ivar(Ivar::Caps) {
        Ok(IvarValue::Caps(caps)) => caps,
        other => panic!("unexpected {other:?}"),
    };
    assert!(!caps().contains(HostCaps::FOUR_BIT_DATA));

    rig.controller.tunables().set_four_wire(true);
    assert!(caps().contains(HostCaps::FOUR_BIT_DATA));
    rig.controller.tunables().set_four_wire(false);
    assert!(!caps().contains(HostCaps::FOUR_BIT_DATA));
}

#[test]
fn test_host_snapshot_reports_live_caps() {
    let rig = Rig::new(SocVariant::Sam9260);
    assert!(!rig.controller.host().caps.contains(HostCaps::FOUR_BIT_DATA));

    rig.controller.tunables().set_four_wire(true);
    assert!(rig.controller.host().caps.contains(HostCaps::FOUR_BIT_DATA));
}

#[test]
fn test_repeated_ios_updates_keep_the_clock() {
    let rig = Rig::new(SocVariant::Sam9260);
    let f_min = rig.controller.host().f_min;
    let first = rig
        .controller
        .set_timing(f_min, BusWidth::One)
        .expect("ios");
    let divider = rig.sim.register(MR) & mci::mr::CLKDIV;
    assert!(first.clock <= f_min);

    for _ in 0..3 {
        let again = rig.controller.update_ios().expect("ios");
        assert_eq!(again.clock, first.clock);
        assert_eq!(rig.sim.register(MR) & mci::mr::CLKDIV, divider);
    }
    assert_eq!(
        rig.controller.read_ivar(Ivar::Clock),
        Ok(IvarValue::Clock(first.clock))
    );
}

#[test]
fn test_zero_master_clock_does_not_panic() {
    let sim = at91mci::Simulator::new(SocVariant::Sam9260, Card::in_memory(CARD_SIZE));
    let controller = at91mci::Controller::attach(
        0,
        Platform::new(SocVariant::Sam9260, 0),
        Tunables::new(false, true),
        sim.registers(),
        sim.dma(),
    );
    assert_eq!(controller.host().f_max, 0);
    let ios = controller
        .set_timing(375_000, BusWidth::One)
        .expect("ios");
    assert_eq!(ios.clock, 0);
}

#[test]
fn test_ios_programs_clock_and_width() {
    let rig = Rig::new(SocVariant::Sam9260);

    let ios = rig
        .controller
        .set_timing(25_000_000, BusWidth::Four)
        .expect("ios");
    assert_eq!(ios.clock, 49_664_000);
    assert_eq!(rig.sim.register(MR) & mci::mr::CLKDIV, 0);
    assert_ne!(rig.sim.register(SDCR) & mci::sdcr::SDCBUS, 0);
    assert_eq!(
        rig.sim.writes_to(CR).last(),
        Some(&(mci::cr::MCIEN | mci::cr::PWSEN))
    );

    rig.controller.tunables().set_use_30mhz(false);
    let ios = rig
        .controller
        .set_timing(25_000_000, BusWidth::One)
        .expect("ios");
    assert_eq!(ios.clock, 24_832_000);
    assert_eq!(rig.sim.register(MR) & mci::mr::CLKDIV, 1);
    assert_eq!(rig.sim.register(SDCR) & mci::sdcr::SDCBUS, 0);

    let ios = rig
        .controller
        .set_timing(400_000, BusWidth::One)
        .expect("ios");
    assert_eq!(ios.clock, 397_312);
    assert_eq!(rig.sim.register(MR) & mci::mr::CLKDIV, 124);
    assert_eq!(
        rig.controller.read_ivar(Ivar::Clock),
        Ok(IvarValue::Clock(397_312))
    );
}

#[test]
fn test_ios_keeps_other_mode_bits() {
    let rig = Rig::new(SocVariant::Sam9260);
    let before = rig.sim.register(MR) & !mci::mr::CLKDIV;
    rig.controller
        .set_timing(1_000_000, BusWidth::One)
        .expect("ios");
    assert_eq!(rig.sim.register(MR) & !mci::mr::CLKDIV, before);
}

#[test]
fn test_zero_clock_disables_controller() {
    let rig = Rig::new(SocVariant::Sam9260);
    rig.controller
        .set_timing(25_000_000, BusWidth::One)
        .expect("ios");

    let ios = rig.controller.set_timing(0, BusWidth::One).expect("ios");
    assert_eq!(ios.clock, 0);
    assert_eq!(rig.sim.writes_to(CR).last(), Some(&mci::cr::MCIDIS));
}

#[test]
fn test_detach_refused_while_busy() {
    let rig = Rig::selected(SocVariant::Sam9260);
    let completion = rig.submit(read_block(0));

    assert_eq!(rig.controller.detach(), Err(BridgeError::Busy));
    rig.service();
    assert!(completion.try_wait().expect("abandoned").is_some());

    rig.sim.clear_logs();
    assert_eq!(rig.controller.detach(), Ok(()));
    assert_eq!(rig.sim.writes_to(IDR), vec![mci::sr::ALL]);
    assert_eq!(
        rig.sim.writes_to(CR),
        vec![mci::cr::MCIDIS | mci::cr::SWRST]
    );
}

#[test]
fn test_detached_controller_refuses_work() {
    let rig = Rig::selected(SocVariant::Sam9260);
    rig.controller.detach().expect("detach");

    let request = read_block(0);
    let rejected = rig.controller.submit(request.clone()).expect_err("detached");
    assert_eq!(rejected.reason, BridgeError::Detached);
    assert_eq!(rejected.request, request);

    assert_eq!(
        rig.controller.read_ivar(Ivar::Clock),
        Err(BridgeError::Detached)
    );
    assert_eq!(
        rig.controller.write_ivar(IvarValue::Clock(1)),
        Err(BridgeError::Detached)
    );
    assert_eq!(rig.controller.update_ios(), Err(BridgeError::Detached));
    assert_eq!(rig.controller.detach(), Err(BridgeError::Detached));

    rig.sim.clear_logs();
    rig.controller.handle_interrupt();
    assert!(rig.sim.write_log().is_empty());
}

#[test]
fn test_into_parts_returns_quiesced_hardware() {
    let rig = Rig::selected(SocVariant::Sam9260);
    rig.controller.detach().expect("detach");

    let Ok(controller) = Arc::try_unwrap(rig.controller) else {
        panic!("controller still shared");
    };
    let (mut regs, _dma) = controller.into_parts();
    assert_eq!(regs.read(IMR), 0);
    assert_eq!(rig.sim.mapped(), 0);
}
