//! Shared setup for the bridge integration tests.
//!
//! A [`Rig`] is one simulated MCI block with a [`Controller`] attached to
//! it. Tests either service interrupts by hand ([`Rig::run`]) to inspect
//! every register write, or start the interrupt thread and go through a
//! [`CardSession`] the way an upper layer would.

use at91mci::mmc::{acmd, ocr, opcode};
use at91mci::sim::{InterruptThread, Reply, SimDma, SimRegisters};
use at91mci::{
    BusMode, BusWidth, Card, CardSession, Command, Completion, Controller, Data, IvarValue,
    Platform, Request, ResponseFlags, SessionError, Simulator, SocVariant, Tunables,
};
use std::sync::Arc;

pub type SimController = Controller<SimRegisters, SimDma>;

/// Default card size for rigs
pub const CARD_SIZE: usize = 4 << 20;

/// Upper bound on handler calls per request; a read or write takes three
pub const PUMP_LIMIT: usize = 16;

/// Route `RUST_LOG`-filtered output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic, non-repeating-per-word test data
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Walk `card` from power-up to transfer state without the controller
pub fn select_card(card: &mut Card) {
    card.execute(opcode::GO_IDLE_STATE, 0);
    card.execute(opcode::SEND_IF_COND, 0x1aa);
    let op_cond = ocr::VDD_320_330 | ocr::VDD_330_340 | ocr::CCS;
    for _ in 0..8 {
        card.execute(opcode::APP_CMD, 0);
        if let Some(Reply::ShortNoCrc(value)) = card.execute(acmd::SD_SEND_OP_COND, op_cond)
            && value & ocr::BUSY != 0
        {
            break;
        }
    }
    card.execute(opcode::ALL_SEND_CID, 0);
    card.execute(opcode::SEND_RELATIVE_ADDR, 0);
    let rca = card.rca() as u32;
    card.execute(opcode::SELECT_CARD, rca << 16);
    assert_eq!(card.state(), at91mci::sim::CardState::Transfer);
}

/// Single-block read of block `lba` (the rig's card is block addressed)
pub fn read_block(lba: u32) -> Request {
    Request::new(
        Command::new(opcode::READ_SINGLE_BLOCK, lba, ResponseFlags::R1)
            .with_data(Data::read(512)),
    )
}

/// Single-block write of `buf` to block `lba`
pub fn write_block(lba: u32, buf: Vec<u8>) -> Request {
    Request::new(
        Command::new(opcode::WRITE_BLOCK, lba, ResponseFlags::R1).with_data(Data::write(buf)),
    )
}

pub struct Rig {
    pub sim: Simulator,
    pub controller: Arc<SimController>,
}

impl Rig {
    /// Fresh controller and idle card; 1-bit bus, overclock allowed
    pub fn new(soc: SocVariant) -> Self {
        Self::with_card(soc, Card::in_memory(CARD_SIZE), Tunables::new(false, true))
    }

    pub fn with_card(soc: SocVariant, card: Card, tunables: Tunables) -> Self {
        init_tracing();
        let sim = Simulator::new(soc, card);
        let controller = Arc::new(Controller::attach(
            0,
            Platform::reference(soc),
            tunables,
            sim.registers(),
            sim.dma(),
        ));
        Self { sim, controller }
    }

    /// Card in transfer state, bus in push-pull at full speed, logs cleared
    pub fn selected(soc: SocVariant) -> Self {
        let rig = Self::new(soc);
        rig.sim.with_card(select_card);
        rig.controller
            .write_ivar(IvarValue::BusMode(BusMode::PushPull))
            .expect("bus mode");
        let f_max = rig.controller.host().f_max;
        rig.controller
            .set_timing(f_max, BusWidth::One)
            .expect("timing");
        rig.sim.clear_logs();
        rig
    }

    pub fn submit(&self, request: Request) -> Completion {
        match self.controller.submit(request) {
            Ok(completion) => completion,
            Err(err) => panic!("submit refused: {}", err.reason),
        }
    }

    /// Call the interrupt handler while the simulated line stays asserted
    pub fn service(&self) -> usize {
        self.sim
            .pump(|| self.controller.handle_interrupt(), PUMP_LIMIT)
    }

    /// Submit `request`, service it and return it with its results
    pub fn run(&self, request: Request) -> Request {
        let completion = self.submit(request);
        self.service();
        completion
            .try_wait()
            .expect("completion abandoned")
            .expect("request still outstanding")
    }

    pub fn interrupt_thread(&self) -> InterruptThread {
        let controller = Arc::clone(&self.controller);
        self.sim
            .spawn_interrupt_thread(move || controller.handle_interrupt())
    }

    /// Bring the card up through the bridge; needs a running interrupt thread
    pub fn session(&self) -> Result<CardSession<SimRegisters, SimDma>, SessionError> {
        CardSession::init(Arc::clone(&self.controller))
    }

    /// Store `bytes` on the card at byte `offset`, bypassing the controller
    pub fn poke(&self, offset: u64, bytes: &[u8]) {
        self.sim
            .with_card(|card| card.storage_mut().write_at(offset, bytes))
            .expect("card poke");
    }

    /// Card contents at byte `offset`, bypassing the controller
    pub fn peek(&self, offset: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        self.sim
            .with_card(|card| card.storage_mut().read_at(offset, &mut buf))
            .expect("card peek");
        buf
    }
}
