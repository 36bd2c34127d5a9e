use at91mci::{Args, BlockDevice, CardSession, Controller, Operation, Simulator, load_fat_file};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tracing::info;

fn main() {
    // Parse command-line arguments
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let card = match args.open_card() {
        Ok(card) => card,
        Err(e) => {
            eprintln!("Failed to open SD card image: {}", e);
            std::process::exit(2);
        }
    };

    let config = args.to_bridge_config();

    info!("=== Attaching MCI{} ({:?}) ===", config.unit, config.platform.soc);
    if let Some(mci) = config.platform.soc.mci_instance(config.unit) {
        info!("MCI{} window at {:#010X}, peripheral ID {}", config.unit, mci.base, mci.irq);
    }
    let sim = Simulator::new(config.platform.soc, card);
    let controller = Arc::new(Controller::attach(
        config.unit,
        config.platform,
        config.tunables(),
        sim.registers(),
        sim.dma(),
    ));
    let _irq = {
        let controller = Arc::clone(&controller);
        sim.spawn_interrupt_thread(move || controller.handle_interrupt())
    };

    info!("=== Initialising card ===");
    let session = match CardSession::init(Arc::clone(&controller)) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Card initialisation failed: {}", e);
            std::process::exit(1);
        }
    };

    let result = run(&args, session);
    let exit_code = match result {
        Ok(()) => {
            info!("=== Done ===");
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

fn run<R, D>(args: &Args, session: CardSession<R, D>) -> Result<(), Box<dyn std::error::Error>>
where
    R: at91mci::RegisterBlock,
    D: at91mci::BusDma,
{
    let card = session.info();
    info!(
        "Card: RCA {:#06X}, {} blocks, {:?} bus @ {} Hz",
        card.rca,
        session.block_count(),
        card.bus_width,
        card.clock
    );

    match args.operation() {
        Operation::Probe => {
            println!(
                "rca={:#06x} capacity={} high_capacity={} bus_width={:?} clock={}",
                card.rca, card.capacity, card.high_capacity, card.bus_width, card.clock
            );
        }
        Operation::ReadSector(lba) => {
            let mut block = [0u8; at91mci::BLOCK_SIZE];
            session.read_block(lba, &mut block)?;
            emit(args, &block)?;
        }
        Operation::WriteSector { lba, input } => {
            let data = std::fs::read(&input)?;
            let mut block = [0u8; at91mci::BLOCK_SIZE];
            let n = data.len().min(block.len());
            block[..n].copy_from_slice(&data[..n]);
            session.write_block(lba, &block)?;
            info!("Wrote {} bytes from {:?} to sector {:#X}", n, input, lba);
        }
        Operation::ReadFile(path) => {
            let contents = load_fat_file(BlockDevice::new(session), &path)?;
            emit(args, &contents)?;
        }
    }
    Ok(())
}

fn emit(args: &Args, bytes: &[u8]) -> std::io::Result<()> {
    match &args.output {
        Some(path) => std::fs::write(path, bytes),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()
        }
    }
}
