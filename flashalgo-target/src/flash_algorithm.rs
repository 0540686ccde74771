use crate::serialize::{hex_option, hex_u_int, hex_vec};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

/// The raw flash algorithm is the description of a flash algorithm,
/// and is usually read from a target description file.
///
/// All entry points are absolute addresses inside the loaded image. Before
/// it can be used for flashing, it has to be assembled into a flash algorithm
/// by the engine, which validates the RAM layout described here.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFlashAlgorithm {
    /// The name of the flash algorithm.
    pub name: String,
    /// The description of the algorithm.
    #[serde(default)]
    pub description: String,
    /// Whether this flash algorithm is the default one or not.
    #[serde(default)]
    pub default: bool,
    /// Memory address where the flash algo instructions will be loaded to.
    #[serde(serialize_with = "hex_u_int")]
    pub load_address: u64,
    /// The little endian bytes of the position-independent code for the algo.
    #[serde(deserialize_with = "deserialize")]
    #[serde(serialize_with = "serialize")]
    pub instructions: Vec<u8>,
    /// Address of the `Init()` entry point. Optional.
    #[serde(default, serialize_with = "hex_option")]
    pub pc_init: Option<u64>,
    /// Address of the `UnInit()` entry point. Optional.
    #[serde(default, serialize_with = "hex_option")]
    pub pc_uninit: Option<u64>,
    /// Address of the `ProgramPage()` entry point.
    #[serde(serialize_with = "hex_u_int")]
    pub pc_program_page: u64,
    /// Address of the `EraseSector()` entry point.
    #[serde(serialize_with = "hex_u_int")]
    pub pc_erase_sector: u64,
    /// Address of the `EraseAll()` entry point. Optional.
    #[serde(default, serialize_with = "hex_option")]
    pub pc_erase_all: Option<u64>,
    /// Initial value of the R9 register for calling flash algo entry points, which
    /// determines where the position-independent data resides.
    #[serde(serialize_with = "hex_u_int")]
    pub static_base: u64,
    /// Initial value of the stack pointer when calling any flash algo API.
    #[serde(serialize_with = "hex_u_int")]
    pub begin_stack: u64,
    /// Start of the data area. Page buffers and analyzer commands live above it.
    #[serde(serialize_with = "hex_u_int")]
    pub begin_data: u64,
    /// Base addresses of the page buffers.
    ///
    /// One entry means single buffered programming, two entries enable
    /// double buffering.
    #[serde(serialize_with = "hex_vec")]
    pub page_buffers: Vec<u64>,
    /// The smallest amount of bytes `ProgramPage()` accepts. Defaults to the page size.
    #[serde(default, serialize_with = "hex_option")]
    pub min_program_length: Option<u32>,
    /// RAM address of the CRC analyzer, if the algorithm supports on-target verification.
    #[serde(default, serialize_with = "hex_option")]
    pub analyzer_address: Option<u64>,
    /// Execution watchdogs for the entry points of this algorithm.
    #[serde(default)]
    pub timeouts: AlgorithmTimeouts,
}

/// The maximum time in milliseconds each entry point may run before the
/// call is considered hung.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AlgorithmTimeouts {
    /// Timeout for `Init()`.
    pub init: u32,
    /// Timeout for `UnInit()`.
    pub uninit: u32,
    /// Timeout for a single `ProgramPage()` call.
    pub program_page: u32,
    /// Timeout for a single `EraseSector()` call.
    pub erase_sector: u32,
    /// Timeout for `EraseAll()`.
    pub erase_all: u32,
    /// Timeout for a CRC analyzer run.
    pub analyzer: u32,
}

impl Default for AlgorithmTimeouts {
    fn default() -> Self {
        Self {
            init: 2_000,
            uninit: 2_000,
            program_page: 2_000,
            erase_sector: 2_000,
            erase_all: 30_000,
            analyzer: 5_000,
        }
    }
}

pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&BASE64.encode(bytes))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Base64Visitor;

    impl<'de> serde::de::Visitor<'de> for Base64Visitor {
        type Value = Vec<u8>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(formatter, "base64 ASCII text")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            // Long blobs are usually wrapped over several lines.
            let compact: String = v.split_whitespace().collect();
            BASE64.decode(compact).map_err(serde::de::Error::custom)
        }
    }

    deserializer.deserialize_str(Base64Visitor)
}
