use crate::config::{config_folder_path, Config, ConfigError, DrainerConfig, GroupConfig, NetworkConfig};

use std::{convert::TryFrom, fmt, fs, path::PathBuf, str::FromStr};

use serde::{de, Deserialize, Deserializer};

/// A point in time as assigned by the network service, in nanoseconds since the UNIX epoch.
///
/// The network service may in theory hand us anything, including dates before the epoch, so
/// this is signed. We refuse to persist negative ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The "beginning of time", where we start draining from on first run
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The state of an output, as reported by the network service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Nobody tried to spend it yet
    Unspent,
    /// A spending transaction was assembled and is being signed
    Signed,
    /// The spending transaction got all its signatures
    Spent,
}

impl TryFrom<u32> for OutputState {
    type Error = ();

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        match n {
            0 => Ok(Self::Unspent),
            1 => Ok(Self::Signed),
            2 => Ok(Self::Spent),
            _ => Err(()),
        }
    }
}

impl From<OutputState> for u32 {
    fn from(state: OutputState) -> u32 {
        match state {
            OutputState::Unspent => 0,
            OutputState::Signed => 1,
            OutputState::Spent => 2,
        }
    }
}

impl FromStr for OutputState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspent" => Ok(Self::Unspent),
            "signed" => Ok(Self::Signed),
            "spent" => Ok(Self::Spent),
            _ => Err(()),
        }
    }
}

impl fmt::Display for OutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match *self {
                Self::Unspent => "unspent",
                Self::Signed => "signed",
                Self::Spent => "spent",
            }
        )
    }
}

impl<'de> Deserialize<'de> for OutputState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        OutputState::from_str(&s)
            .map_err(|_| de::Error::custom(format!("Unknown output state '{}'", s)))
    }
}

/// The state of a transaction spending our outputs.
///
/// This is an ordered, open-ended set: we only ever make the distinction between `INITIAL` and
/// `SIGNED`, but the signing and broadcasting machinery may record later states. We never
/// interpret them, and never move a transaction backward from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionState(u32);

impl TransactionState {
    /// We heard about this transaction, it's missing signatures
    pub const INITIAL: TransactionState = TransactionState(10);
    /// The transaction has its aggregated signature
    pub const SIGNED: TransactionState = TransactionState(11);

    pub fn from_u32(n: u32) -> Self {
        Self(n)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::INITIAL => write!(f, "initial"),
            Self::SIGNED => write!(f, "signed"),
            Self(n) => write!(f, "state({})", n),
        }
    }
}

/// The state of a notification we emitted for a newly observed output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// Not yet picked up by the consumer
    Initial,
    /// The consumer is done with it
    Done,
}

impl TryFrom<u32> for ActionState {
    type Error = ();

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        match n {
            10 => Ok(Self::Initial),
            11 => Ok(Self::Done),
            _ => Err(()),
        }
    }
}

impl From<ActionState> for u32 {
    fn from(state: ActionState) -> u32 {
        match state {
            ActionState::Initial => 10,
            ActionState::Done => 11,
        }
    }
}

/// Our global state
pub struct MtgSyncD {
    /// We store all our data in one place, that's here.
    pub data_dir: PathBuf,
    /// Whether we should detach from the terminal
    pub daemon: bool,

    /// Who are the custodians we are syncing outputs for
    pub group: GroupConfig,
    /// Everything we need to know to talk to the network service
    pub network_config: NetworkConfig,
    /// How to drain the outputs from the network service
    pub drainer_config: DrainerConfig,
}

impl MtgSyncD {
    /// Creates our global state by consuming the static configuration
    pub fn from_config(config: Config) -> Result<MtgSyncD, ConfigError> {
        let data_dir = config
            .data_dir
            .or_else(config_folder_path)
            .ok_or(ConfigError::DatadirNotFound)?;
        if !data_dir.as_path().exists() {
            fs::create_dir_all(&data_dir).map_err(|e| {
                ConfigError::Unexpected(format!(
                    "Could not create data dir '{:?}': {}.",
                    data_dir,
                    e.to_string()
                ))
            })?;
        }

        Ok(MtgSyncD {
            data_dir,
            daemon: config.daemon.unwrap_or(false),
            group: config.group,
            network_config: config.network_config,
            drainer_config: config.drainer_config,
        })
    }

    fn file_from_datadir(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }

    pub fn log_file(&self) -> PathBuf {
        self.file_from_datadir("log")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.file_from_datadir("mtgsyncd.pid")
    }

    pub fn db_file(&self) -> PathBuf {
        self.file_from_datadir("mtgsyncd.sqlite3")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{dummy_mtgsyncd, test_datadir};

    #[test]
    fn test_from_config() {
        let datadir = test_datadir();
        let mtgsyncd = dummy_mtgsyncd(datadir.clone());

        assert!(datadir.exists());
        assert!(mtgsyncd.db_file().ends_with("mtgsyncd.sqlite3"));
        assert!(mtgsyncd.db_file().starts_with(&datadir));
        assert_eq!(mtgsyncd.group.threshold, 2);

        fs::remove_dir_all(&datadir).unwrap_or_else(|_| ());
    }

    #[test]
    fn transaction_state_ordering() {
        assert!(TransactionState::INITIAL < TransactionState::SIGNED);
        // Whatever comes after signing is still "at least signed"
        let broadcast = TransactionState::from_u32(12);
        assert!(broadcast > TransactionState::SIGNED);
        assert_eq!(broadcast.to_string(), "state(12)");
        assert_eq!(TransactionState::SIGNED.to_string(), "signed");
    }

    #[test]
    fn output_state_representations() {
        for state in &[OutputState::Unspent, OutputState::Signed, OutputState::Spent] {
            assert_eq!(OutputState::from_str(&state.to_string()), Ok(*state));
            assert_eq!(OutputState::try_from(u32::from(*state)), Ok(*state));
        }
        // Stored in the database, must not change
        assert_eq!(u32::from(OutputState::Unspent), 0);
        assert_eq!(u32::from(OutputState::Signed), 1);
        assert_eq!(u32::from(OutputState::Spent), 2);
        assert_eq!(OutputState::try_from(2), Ok(OutputState::Spent));
        OutputState::try_from(3).unwrap_err();

        let state: OutputState = serde_json::from_str("\"signed\"").unwrap();
        assert_eq!(state, OutputState::Signed);
        serde_json::from_str::<OutputState>("\"burnt\"").unwrap_err();
    }
}
