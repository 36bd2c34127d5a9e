//! Card bring-up and block I/O through the bridge, with the simulator's
//! interrupt thread delivering interrupts.

use at91mci::sim::card::DEFAULT_RCA;
use at91mci::sim::{CardState, Storage};
use at91mci::{
    BLOCK_SIZE, BlockDevice, BusMode, BusWidth, Card, HostMode, SessionError, SocVariant,
    Tunables, load_fat_file,
};
use mci_test_helpers::{CARD_SIZE, Rig, pattern};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

fn fat_image(len: usize, files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut disk = Cursor::new(vec![0u8; len]);
    fatfs::format_volume(&mut disk, fatfs::FormatVolumeOptions::new()).expect("format");
    {
        let fs = fatfs::FileSystem::new(&mut disk, fatfs::FsOptions::new()).expect("mount");
        for (name, contents) in files {
            let mut file = fs.root_dir().create_file(name).expect("create");
            file.write_all(contents).expect("write");
        }
        fs.unmount().expect("unmount");
    }
    disk.into_inner()
}

#[test]
fn test_init_four_bit_overclocked() {
    let rig = Rig::with_card(
        SocVariant::Sam9260,
        Card::in_memory(CARD_SIZE),
        Tunables::new(true, true),
    );
    let _irq = rig.interrupt_thread();
    let session = rig.session().expect("init");

    let info = session.info();
    assert_eq!(info.rca, DEFAULT_RCA);
    assert!(info.high_capacity);
    assert_eq!(info.capacity, CARD_SIZE as u64);
    assert_eq!(info.bus_width, BusWidth::Four);
    // 99.328 MHz MCK / 2
    assert_eq!(info.clock, 49_664_000);
    assert_eq!(session.block_count(), (CARD_SIZE / BLOCK_SIZE) as u64);

    let host = rig.controller.host();
    assert_eq!(host.ios.bus_mode, BusMode::PushPull);
    assert_eq!(host.mode, HostMode::Sd);
    assert_ne!(host.ocr, 0);
    assert!(rig.sim.with_card(|card| card.is_four_bit()));
    assert_eq!(
        rig.sim.with_card(|card| card.state()),
        CardState::Transfer
    );
    assert_eq!(rig.controller.mapped_count(), 0);
}

#[test]
fn test_init_one_bit_default_speed() {
    let rig = Rig::with_card(
        SocVariant::Sam9260,
        Card::in_memory(CARD_SIZE),
        Tunables::new(false, false),
    );
    let _irq = rig.interrupt_thread();
    let info = rig.session().expect("init").info();

    assert_eq!(info.bus_width, BusWidth::One);
    assert_eq!(info.clock, 24_832_000);
    assert!(!rig.sim.with_card(|card| card.is_four_bit()));
}

#[test]
fn test_init_without_interrupts_stalls() {
    let rig = Rig::new(SocVariant::Sam9260);
    let session = at91mci::CardSession::init_with_timeout(
        std::sync::Arc::clone(&rig.controller),
        std::time::Duration::from_millis(20),
    );
    assert!(matches!(session, Err(SessionError::Stalled(_))));
}

#[test]
fn test_block_round_trip() {
    for soc in [SocVariant::Sam9260, SocVariant::Sam9261, SocVariant::Rm9200] {
        let rig = Rig::new(soc);
        let _irq = rig.interrupt_thread();
        let session = rig.session().expect("init");

        let block = pattern(BLOCK_SIZE, 42);
        session.write_block(10, &block).expect("write");
        assert_eq!(rig.peek(10 * BLOCK_SIZE as u64, BLOCK_SIZE), block, "{soc:?}");

        let mut back = vec![0; BLOCK_SIZE];
        session.read_block(10, &mut back).expect("read");
        assert_eq!(back, block, "{soc:?}");
    }
}

#[test]
fn test_partial_blocks_are_refused() {
    let rig = Rig::new(SocVariant::Sam9260);
    let _irq = rig.interrupt_thread();
    let session = rig.session().expect("init");

    let mut short = [0u8; 100];
    assert!(matches!(
        session.read_block(0, &mut short),
        Err(SessionError::Unaligned(100))
    ));
    assert!(matches!(
        session.write_block(0, &[0u8; 1024]),
        Err(SessionError::Unaligned(1024))
    ));
}

#[test]
fn test_status_reports_transfer_state() {
    let rig = Rig::new(SocVariant::Sam9260);
    let _irq = rig.interrupt_thread();
    let session = rig.session().expect("init");

    let status = session.status().expect("status");
    assert_eq!((status >> 9) & 0xf, CardState::Transfer as u32);
}

#[test]
fn test_read_past_end_reports_error() {
    let rig = Rig::new(SocVariant::Sam9260);
    let _irq = rig.interrupt_thread();
    let session = rig.session().expect("init");

    let mut buf = vec![0; BLOCK_SIZE];
    let err = session
        .read_block(session.block_count(), &mut buf)
        .expect_err("out of range");
    assert!(matches!(err, SessionError::Command { opcode: 17, .. }));
    assert_eq!(rig.controller.mapped_count(), 0);
}

#[test]
fn test_block_device_unaligned_access() {
    let rig = Rig::new(SocVariant::Sam9260);
    let _irq = rig.interrupt_thread();
    let mut dev = BlockDevice::new(rig.session().expect("init"));
    assert_eq!(dev.len(), CARD_SIZE as u64);

    rig.poke(0, &[0x5a; 2048]);
    let payload = pattern(100, 9);
    dev.seek(SeekFrom::Start(1000)).expect("seek");
    dev.write_all(&payload).expect("write");

    // neighbours of the touched range survive the read-modify-write
    assert_eq!(rig.peek(996, 4), vec![0x5a; 4]);
    assert_eq!(rig.peek(1000, 100), payload);
    assert_eq!(rig.peek(1100, 4), vec![0x5a; 4]);

    let mut back = vec![0; 100];
    dev.seek(SeekFrom::Current(-100)).expect("seek");
    dev.read_exact(&mut back).expect("read");
    assert_eq!(back, payload);
    assert_eq!(dev.seek(SeekFrom::End(0)).expect("seek"), CARD_SIZE as u64);
}

#[test]
fn test_fat_file_on_bare_volume() {
    let contents: &[u8] = b"console=ttyS0,115200 root=/dev/mmcblk0p2";
    let image = fat_image(CARD_SIZE, &[("cmdline.txt", contents)]);
    let rig = Rig::with_card(
        SocVariant::Sam9260,
        Card::new(Storage::Memory(image)),
        Tunables::new(true, true),
    );
    let _irq = rig.interrupt_thread();
    let dev = BlockDevice::new(rig.session().expect("init"));

    let loaded = load_fat_file(dev, "cmdline.txt").expect("load");
    assert_eq!(loaded, contents);
}

#[test]
fn test_fat_file_in_first_partition() {
    const START_LBA: usize = 2048;
    let kernel = pattern(3000, 77);
    let volume = fat_image(CARD_SIZE - START_LBA * BLOCK_SIZE, &[("uImage", kernel.as_slice())]);

    let mut image = vec![0u8; CARD_SIZE];
    let entry = 446;
    image[entry + 4] = 0x0c;
    image[entry + 8..entry + 12].copy_from_slice(&(START_LBA as u32).to_le_bytes());
    let sectors = (volume.len() / BLOCK_SIZE) as u32;
    image[entry + 12..entry + 16].copy_from_slice(&sectors.to_le_bytes());
    image[510] = 0x55;
    image[511] = 0xaa;
    image[START_LBA * BLOCK_SIZE..].copy_from_slice(&volume);

    let rig = Rig::with_card(
        SocVariant::Rm9200,
        Card::new(Storage::Memory(image)),
        Tunables::new(false, true),
    );
    let _irq = rig.interrupt_thread();
    let dev = BlockDevice::new(rig.session().expect("init"));

    assert_eq!(load_fat_file(dev, "uImage").expect("load"), kernel);
}

#[test]
fn test_fat_write_through_block_device() {
    let image = fat_image(CARD_SIZE, &[]);
    let rig = Rig::with_card(
        SocVariant::Sam9260,
        Card::new(Storage::Memory(image)),
        Tunables::new(false, true),
    );
    let _irq = rig.interrupt_thread();
    let mut dev = BlockDevice::new(rig.session().expect("init"));

    let notes = pattern(1500, 5);
    {
        let fs = fatfs::FileSystem::new(&mut dev, fatfs::FsOptions::new()).expect("mount");
        let mut file = fs.root_dir().create_file("notes.bin").expect("create");
        file.write_all(&notes).expect("write");
        drop(file);
        fs.unmount().expect("unmount");
    }

    assert_eq!(load_fat_file(dev, "notes.bin").expect("load"), notes);
}
