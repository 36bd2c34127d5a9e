//! End-to-end smoke run
//!
//! Brings a simulated card up on every supported quirk combination, writes
//! a block and reads it back. Prints PASS or FAIL and exits accordingly.

use at91mci::{BLOCK_SIZE, SocVariant};
use mci_test_helpers::{Rig, pattern};

fn run(soc: SocVariant) -> Result<(), String> {
    let rig = Rig::new(soc);
    let _irq = rig.interrupt_thread();
    let session = rig.session().map_err(|e| e.to_string())?;

    let block = pattern(BLOCK_SIZE, 0xa5);
    session.write_block(1, &block).map_err(|e| e.to_string())?;
    let mut back = vec![0; BLOCK_SIZE];
    session.read_block(1, &mut back).map_err(|e| e.to_string())?;
    if back != block {
        return Err("read back differs from written block".to_string());
    }
    if rig.controller.mapped_count() != 0 {
        return Err("DMA mapping left loaded".to_string());
    }
    Ok(())
}

fn main() {
    let mut failed = false;
    for soc in [SocVariant::Rm9200, SocVariant::Sam9260, SocVariant::Sam9261] {
        match run(soc) {
            Ok(()) => println!("PASS {soc:?}"),
            Err(e) => {
                println!("FAIL {soc:?}: {e}");
                failed = true;
            }
        }
    }
    std::process::exit(if failed { 1 } else { 0 });
}
