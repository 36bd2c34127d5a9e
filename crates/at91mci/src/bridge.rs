//! The host side of the MMC/SD bridge contract.
//!
//! A [`Controller`] owns one MCI instance. Requests are submitted from any
//! thread; the platform's interrupt path calls [`Controller::handle_interrupt`].
//! Both serialize on the controller's state lock, and at most one request is
//! outstanding at a time.

use crate::clock::{self, ClockPlan};
use crate::config::Tunables;
use crate::dma::{BusDma, DmaMap};
use crate::error::{BridgeError, SubmitError};
use crate::host::{BusWidth, HostCaps, HostParams, Ios, Ivar, IvarValue};
use crate::mmc::{Request, ocr};
use crate::platform::Platform;
use crate::regs::{RegisterBlock, Regs};
use crate::sequencer::Active;
use at91mci_hw::mmio::mci::{self, registers::*};
use at91mci_hw::specs;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How long `acquire_host` sleeps before re-checking bus ownership
pub const HOST_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Largest transfer advertised upstream, in blocks
pub const MAX_DATA_BLOCKS: u32 = 1;

/// Controller quirks fixed at attach time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Quirks {
    /// PDC words arrive byte-reversed (RM9200)
    pub(crate) needs_byteswap: bool,
    /// Writes under 12 bytes must be padded (MCI1 rev2xx)
    pub(crate) short_write_erratum: bool,
}

/// Everything guarded by the controller lock
pub(crate) struct State<R, D> {
    pub(crate) regs: Regs<R>,
    pub(crate) dma: DmaMap<D>,
    pub(crate) bounce: Box<[u8]>,
    pub(crate) host: HostParams,
    /// Last clock written through the ivar; `host.ios.clock` holds the achieved rate
    pub(crate) clock_request: u32,
    pub(crate) quirks: Quirks,
    pub(crate) active: Option<Active>,
    pub(crate) detached: bool,
}

/// Sending half of a request's completion; consumed when it fires
#[derive(Debug)]
pub(crate) struct Completer {
    tx: SyncSender<Request>,
}

impl Completer {
    pub(crate) fn complete(self, request: Request) {
        if self.tx.send(request).is_err() {
            debug!("completion dropped by submitter");
        }
    }
}

/// Handle to the outcome of a submitted request, resolved exactly once
#[derive(Debug)]
pub struct Completion {
    rx: Receiver<Request>,
}

impl Completion {
    fn pair() -> (Completer, Self) {
        let (tx, rx) = mpsc::sync_channel(1);
        (Completer { tx }, Self { rx })
    }

    /// Block until the request finishes and take it back with its results
    pub fn wait(self) -> Result<Request, BridgeError> {
        self.rx.recv().map_err(|_| BridgeError::Abandoned)
    }

    /// Like [`Completion::wait`], giving up after `timeout` with `Ok(None)`
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<Request>, BridgeError> {
        match self.rx.recv_timeout(timeout) {
            Ok(request) => Ok(Some(request)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Abandoned),
        }
    }

    /// The finished request, if it already completed
    pub fn try_wait(&self) -> Result<Option<Request>, BridgeError> {
        match self.rx.try_recv() {
            Ok(request) => Ok(Some(request)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BridgeError::Abandoned),
        }
    }
}

/// One attached MCI instance
pub struct Controller<R, D> {
    unit: u32,
    platform: Platform,
    tunables: Tunables,
    state: Mutex<State<R, D>>,
    host_busy: Mutex<bool>,
    host_released: Condvar,
}

impl<R: RegisterBlock, D: BusDma> Controller<R, D> {
    /// Bring the controller out of reset and describe it to upper layers.
    pub fn attach(unit: u32, platform: Platform, tunables: Tunables, regs: R, dma: D) -> Self {
        let quirks = Quirks {
            needs_byteswap: platform.soc.needs_byteswap(),
            short_write_erratum: platform.soc.is_mci1_rev2xx(),
        };

        let mut regs = Regs::new(regs);
        regs.fini();
        regs.init(quirks.short_write_erratum);

        let mut host = HostParams {
            f_min: specs::clock::F_MIN_HZ,
            f_max: platform.f_max(),
            host_ocr: ocr::VDD_320_330 | ocr::VDD_330_340,
            ..HostParams::default()
        };
        host.caps.set(HostCaps::FOUR_BIT_DATA, tunables.four_wire());

        info!(
            "MCI{} attached: {:?} @ {} Hz MCK, f_max {} Hz, caps {:?}, byteswap {}, short-write erratum {}",
            unit,
            platform.soc,
            platform.master_clock,
            host.f_max,
            host.caps,
            quirks.needs_byteswap,
            quirks.short_write_erratum
        );

        Self {
            unit,
            platform,
            tunables,
            state: Mutex::new(State {
                regs,
                dma: DmaMap::new(dma),
                bounce: vec![0; specs::dma::BOUNCE_BUFFER_SIZE].into_boxed_slice(),
                host,
                clock_request: 0,
                quirks,
                active: None,
                detached: false,
            }),
            host_busy: Mutex::new(false),
            host_released: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<R, D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn unit(&self) -> u32 {
        self.unit
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Live options; changes apply on the next ios update or caps read
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// Start `request`, or hand it back if another one is outstanding.
    #[instrument(level = "debug", skip_all, fields(unit = self.unit, opcode = request.cmd.opcode))]
    pub fn submit(&self, request: Request) -> Result<Completion, SubmitError> {
        let mut state = self.state();
        if state.detached {
            return Err(SubmitError {
                reason: BridgeError::Detached,
                request,
            });
        }
        if state.active.is_some() {
            debug!("rejecting request: controller busy");
            return Err(SubmitError {
                reason: BridgeError::Busy,
                request,
            });
        }

        let (completer, completion) = Completion::pair();
        state.active = Some(Active::new(request, completer));
        state.advance();
        Ok(completion)
    }

    /// Interrupt entry point
    #[instrument(level = "trace", skip_all, fields(unit = self.unit))]
    pub fn handle_interrupt(&self) {
        let mut state = self.state();
        if state.detached {
            warn!("interrupt on detached controller");
            return;
        }
        state.interrupt();
    }

    /// True while a request is outstanding
    pub fn is_busy(&self) -> bool {
        self.state().active.is_some()
    }

    /// Outstanding DMA loads (0 or 1)
    pub fn mapped_count(&self) -> u32 {
        self.state().dma.mapped()
    }

    /// Take exclusive ownership of the bus, sleeping until it is free.
    pub fn acquire_host(&self) {
        let mut busy = self.host_busy.lock().unwrap_or_else(PoisonError::into_inner);
        while *busy {
            busy = match self.host_released.wait_timeout(busy, HOST_RETRY_INTERVAL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *busy = true;
        debug!("MCI{} host acquired", self.unit);
    }

    /// Give up bus ownership and wake one waiter
    pub fn release_host(&self) {
        let mut busy = self.host_busy.lock().unwrap_or_else(PoisonError::into_inner);
        if !*busy {
            warn!("MCI{} host released while not held", self.unit);
        }
        *busy = false;
        self.host_released.notify_one();
        debug!("MCI{} host released", self.unit);
    }

    /// No write-protect sensing on this controller
    pub fn get_ro(&self) -> bool {
        false
    }

    /// Snapshot of the negotiated host parameters, caps included
    pub fn host(&self) -> HostParams {
        let mut host = self.state().host;
        host.caps.set(HostCaps::FOUR_BIT_DATA, self.tunables.four_wire());
        host
    }

    pub fn read_ivar(&self, ivar: Ivar) -> Result<IvarValue, BridgeError> {
        let mut state = self.state();
        if state.detached {
            return Err(BridgeError::Detached);
        }
        if ivar == Ivar::Caps {
            let four_wire = self.tunables.four_wire();
            state.host.caps.set(HostCaps::FOUR_BIT_DATA, four_wire);
        }
        Ok(state.host.get(ivar, MAX_DATA_BLOCKS))
    }

    pub fn write_ivar(&self, value: IvarValue) -> Result<(), BridgeError> {
        let mut state = self.state();
        if state.detached {
            return Err(BridgeError::Detached);
        }
        if !state.host.set(value) {
            return Err(BridgeError::ReadOnly(value.ivar()));
        }
        if let IvarValue::Clock(hz) = value {
            state.clock_request = hz;
        }
        Ok(())
    }

    /// Program clock, enable state and bus width from the current ios.
    ///
    /// The divider always comes from the last requested clock; the ios
    /// reports the achieved one.
    #[instrument(level = "debug", skip_all, fields(unit = self.unit))]
    pub fn update_ios(&self) -> Result<Ios, BridgeError> {
        let mut state = self.state();
        if state.detached {
            return Err(BridgeError::Detached);
        }
        let requested = state.clock_request;
        let plan = clock::plan(
            requested,
            self.platform.master_clock,
            self.tunables.use_30mhz(),
        );
        match plan {
            ClockPlan::Disabled => state.regs.wr(CR, mci::cr::MCIDIS),
            ClockPlan::Enabled(_) => state.regs.wr(CR, mci::cr::MCIEN | mci::cr::PWSEN),
        }
        state.host.ios.clock = plan.actual_hz();

        let sdcr = state.regs.rd(SDCR);
        let sdcr = if state.host.ios.bus_width == BusWidth::Four {
            sdcr | mci::sdcr::SDCBUS
        } else {
            sdcr & !mci::sdcr::SDCBUS
        };
        state.regs.wr(SDCR, sdcr);

        let mr = state.regs.rd(MR) & !mci::mr::CLKDIV;
        state.regs.wr(MR, mr | plan.divider());

        // TODO: card power and detect need a board GPIO hook before this can
        // honour PowerMode::Off
        debug!(
            "ios: requested {} Hz, running {} Hz (div {}), width {:?}",
            requested,
            plan.actual_hz(),
            plan.divider(),
            state.host.ios.bus_width
        );
        Ok(state.host.ios)
    }

    /// Set clock and bus width in one step and apply them.
    pub fn set_timing(&self, clock: u32, width: BusWidth) -> Result<Ios, BridgeError> {
        self.write_ivar(IvarValue::Clock(clock))?;
        self.write_ivar(IvarValue::BusWidth(width))?;
        self.update_ios()
    }

    /// Quiesce the hardware. Refused while a request is outstanding; after
    /// success every further operation reports [`BridgeError::Detached`].
    #[instrument(level = "debug", skip_all, fields(unit = self.unit))]
    pub fn detach(&self) -> Result<(), BridgeError> {
        let mut state = self.state();
        if state.detached {
            return Err(BridgeError::Detached);
        }
        if state.active.is_some() {
            return Err(BridgeError::Busy);
        }
        state.regs.fini();
        state.detached = true;
        info!("MCI{} detached", self.unit);
        Ok(())
    }

    /// Recover the register block and DMA engine
    pub fn into_parts(self) -> (R, D) {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        (state.regs.into_inner(), state.dma.into_inner())
    }
}
