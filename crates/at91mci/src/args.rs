use crate::config::BridgeConfig;
use crate::platform::{Platform, SocVariant};
use crate::session::BLOCK_SIZE;
use crate::sim::Card;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
pub struct Args {
    /// Path to SD card image (raw disk image, optionally MBR + FAT).
    /// Without it an empty in-memory card of --card-size MiB is used.
    #[arg(long)]
    pub sd_card: Option<PathBuf>,

    /// Size of the in-memory card in MiB
    #[arg(long, default_value_t = 64)]
    pub card_size: u32,

    /// SoC whose MCI block (and quirks) to simulate
    #[arg(long, value_enum, default_value_t = SocVariant::Sam9260)]
    pub soc: SocVariant,

    /// Master clock in Hz (hex: 0x1234 or decimal: 1234); defaults to the
    /// SoC's reference board
    #[arg(long, value_parser = parse_hex_or_dec)]
    pub master_clock: Option<u64>,

    /// Controller unit number, used for AT91_MCI_<unit>_* hints
    #[arg(long, default_value_t = 0)]
    pub unit: u32,

    /// Use the 4-bit data bus
    #[arg(long, conflicts_with = "one_wire")]
    pub four_wire: bool,

    /// Stay on the 1-bit data bus
    #[arg(long)]
    pub one_wire: bool,

    /// Never run a 25 MHz request at MCK / 2
    #[arg(long)]
    pub no_overclock: bool,

    /// Dump this sector (hex: 0x1234 or decimal: 1234)
    #[arg(long, value_parser = parse_hex_or_dec)]
    pub read_sector: Option<u64>,

    /// Write the first 512 bytes of --input to this sector
    #[arg(long, value_parser = parse_hex_or_dec)]
    pub write_sector: Option<u64>,

    /// Local file supplying --write-sector data
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Read this file from the FAT filesystem on the card (e.g. "boot/uImage")
    #[arg(long)]
    pub file: Option<String>,

    /// Where to store --file or --read-sector data instead of stdout
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

/// What the tool was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Bring the card up and report what was found
    Probe,
    ReadSector(u64),
    WriteSector { lba: u64, input: PathBuf },
    ReadFile(String),
}

impl Args {
    /// Validate that the arguments are consistent
    pub fn validate(&self) -> Result<(), String> {
        let operations = [
            self.read_sector.is_some(),
            self.write_sector.is_some(),
            self.file.is_some(),
        ];
        if operations.iter().filter(|&&op| op).count() > 1 {
            return Err(
                "--read-sector, --write-sector and --file are mutually exclusive".to_string(),
            );
        }
        if self.write_sector.is_some() && self.input.is_none() {
            return Err("--write-sector requires --input to be specified".to_string());
        }
        if self.input.is_some() && self.write_sector.is_none() {
            return Err("--input is only used with --write-sector".to_string());
        }
        if self.master_clock == Some(0) {
            return Err("--master-clock must be non-zero".to_string());
        }
        if self.master_clock.is_some_and(|hz| hz > u32::MAX as u64) {
            return Err("--master-clock does not fit in 32 bits".to_string());
        }
        if self.soc.mci_instance(self.unit).is_none() {
            return Err(format!("{:?} has no MCI{}", self.soc, self.unit));
        }
        if self.sd_card.is_none() && self.card_size == 0 {
            return Err("--card-size must be non-zero".to_string());
        }
        Ok(())
    }

    pub fn operation(&self) -> Operation {
        if let Some(lba) = self.read_sector {
            Operation::ReadSector(lba)
        } else if let (Some(lba), Some(input)) = (self.write_sector, &self.input) {
            Operation::WriteSector {
                lba,
                input: input.clone(),
            }
        } else if let Some(path) = &self.file {
            Operation::ReadFile(path.clone())
        } else {
            Operation::Probe
        }
    }

    /// Convert Args to BridgeConfig
    pub fn to_bridge_config(&self) -> BridgeConfig {
        let platform = match self.master_clock {
            Some(hz) => Platform::new(self.soc, hz as u32),
            None => Platform::reference(self.soc),
        };
        BridgeConfig {
            unit: self.unit,
            platform,
            four_wire: if self.four_wire {
                Some(true)
            } else if self.one_wire {
                Some(false)
            } else {
                None
            },
            use_30mhz: self.no_overclock.then_some(false),
        }
    }

    /// The card to put behind the simulated controller
    pub fn open_card(&self) -> std::io::Result<Card> {
        match &self.sd_card {
            Some(path) => Card::open(path),
            None => Ok(Card::in_memory(self.card_size as usize * 1024 * 1024)),
        }
    }
}

pub fn parse_hex_or_dec(s: &str) -> Result<u64, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

/// Load a file from the FAT filesystem found on `device`.
///
/// A partitioned image is opened through its first MBR partition; an
/// unpartitioned one is treated as a bare FAT volume.
pub fn load_fat_file<T>(device: T, path: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>>
where
    T: std::io::Read + std::io::Write + std::io::Seek,
{
    use fscommon::{BufStream, StreamSlice};
    use std::io::{Read, Seek, SeekFrom};
    use tracing::info;

    let mut stream = BufStream::new(device);
    let (start, end) = match first_partition(&mut stream)? {
        Some(range) => range,
        None => (0, stream.seek(SeekFrom::End(0))?),
    };
    info!("Opening FAT volume at bytes {:#X}..{:#X}", start, end);

    let volume = StreamSlice::new(stream, start, end)?;
    let fs = fatfs::FileSystem::new(volume, fatfs::FsOptions::new())?;
    let mut file = fs.root_dir().open_file(path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;

    info!("Successfully loaded {} bytes from {:?}", contents.len(), path);
    Ok(contents)
}

/// Byte range of the first MBR partition, if the image has a partition table
fn first_partition<T>(stream: &mut T) -> std::io::Result<Option<(u64, u64)>>
where
    T: std::io::Read + std::io::Seek,
{
    use std::io::SeekFrom;

    let mut mbr = [0u8; BLOCK_SIZE];
    stream.seek(SeekFrom::Start(0))?;
    stream.read_exact(&mut mbr)?;
    if mbr[510..512] != [0x55, 0xaa] {
        return Ok(None);
    }
    // A FAT boot sector also ends in 55 AA; it starts with a jump instead
    if matches!(mbr[0], 0xeb | 0xe9) {
        return Ok(None);
    }
    let entry = &mbr[446..462];
    let lba = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]) as u64;
    let sectors = u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]) as u64;
    if entry[4] == 0 || sectors == 0 {
        return Ok(None);
    }
    let start = lba * BLOCK_SIZE as u64;
    Ok(Some((start, start + sectors * BLOCK_SIZE as u64)))
}
