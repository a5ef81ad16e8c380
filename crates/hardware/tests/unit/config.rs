//! # Configuration Tests
//!
//! Defaults, JSON deserialization, name parsing and validation.

use std::io::Write;

use cohsim_core::common::ConfigError;
use cohsim_core::config::*;
use pretty_assertions::assert_eq;
use rstest::rstest;

// ══════════════════════════════════════════════════════════
// 1. Defaults
// ══════════════════════════════════════════════════════════

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.general.num_cores, 2);
    assert_eq!(config.general.line_bytes, 64);
    assert_eq!(config.num_nodes(), 2);
}

#[test]
fn default_hierarchy_geometry() {
    let cache = CacheHierarchyConfig::default();
    assert!(cache.l1_i.enabled);
    assert!(cache.l1_d.enabled);
    assert!(cache.l2.enabled);
    assert!(!cache.l3.enabled);
    assert_eq!(cache.l1_d.size_bytes, 32 * 1024);
    assert_eq!(cache.l1_d.ways, 8);
    assert_eq!(cache.l2.size_bytes, 256 * 1024);
    assert_eq!(cache.l3.ways, 16);
    assert_eq!(cache.l1_d.policy, ReplacementPolicy::Lru);
    assert_eq!(cache.l1_d.num_sets(64), 64);
}

#[test]
fn default_directory_and_memory() {
    let dir = DirectoryConfig::default();
    assert!(dir.enabled);
    assert_eq!(dir.protocol, Protocol::Mesi);
    assert_eq!(dir.kind, DirectoryType::FullMap);
    assert_eq!(dir.homes, 1);
    assert_eq!(dir.total_entries % dir.associativity, 0);

    let memory = MemoryConfig::default();
    assert_eq!(memory.controller, MemoryController::Simple);
    assert_eq!(memory.latency, 100);
    assert_eq!((memory.t_cas, memory.t_ras, memory.t_pre), (14, 14, 14));
}

// ══════════════════════════════════════════════════════════
// 2. JSON
// ══════════════════════════════════════════════════════════

#[test]
fn partial_json_keeps_defaults() {
    let config = Config::from_json(r#"{ "general": { "num_cores": 4 } }"#).unwrap();
    assert_eq!(config.general.num_cores, 4);
    assert_eq!(config.general.line_bytes, 64);
    assert_eq!(config.cache.l2.size_bytes, 256 * 1024);
    assert_eq!(config.network.hop_latency, 8);
}

#[test]
fn json_names_accept_aliases() {
    let json = r#"{
        "cache": { "l1_d": { "policy": "fifo" }, "l2": { "policy": "Random" } },
        "directory": { "protocol": "MESIF", "type": "LimitedBroadcast", "max_hw_sharers": 2 },
        "memory": { "controller": "dram" }
    }"#;
    let config = Config::from_json(json).unwrap();
    assert_eq!(config.cache.l1_d.policy, ReplacementPolicy::Fifo);
    assert_eq!(config.cache.l2.policy, ReplacementPolicy::Random);
    assert_eq!(config.directory.protocol, Protocol::Mesif);
    assert_eq!(config.directory.kind, DirectoryType::LimitedBroadcast);
    assert_eq!(config.memory.controller, MemoryController::Dram);
}

#[test]
fn json_round_trip_preserves_settings() {
    let mut config = Config::default();
    config.general.num_cores = 8;
    config.cache.l3.enabled = true;
    config.cache.l3.shared_cores = 8;
    config.directory.protocol = Protocol::Msi;
    let text = serde_json::to_string(&config).unwrap();
    let back = Config::from_json(&text).unwrap();
    assert_eq!(back.general.num_cores, 8);
    assert!(back.cache.l3.enabled);
    assert_eq!(back.directory.protocol, Protocol::Msi);
    assert_eq!(back.num_nodes(), 1);
}

#[test]
fn malformed_json_is_a_parse_error() {
    let err = Config::from_json("{ general: 4 }").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)), "got {err}");
}

#[test]
fn from_file_reads_and_validates() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{ "general": {{ "num_cores": 4 }}, "directory": {{ "homes": 2 }} }}"#).unwrap();
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.general.num_cores, 4);
    assert_eq!(config.directory.homes, 2);
}

#[test]
fn from_file_missing_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::from_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)), "got {err}");
}

// ══════════════════════════════════════════════════════════
// 3. Name parsing
// ══════════════════════════════════════════════════════════

#[rstest]
#[case("msi", Protocol::Msi)]
#[case("MESI", Protocol::Mesi)]
#[case("Mesif", Protocol::Mesif)]
fn protocol_from_str(#[case] name: &str, #[case] expected: Protocol) {
    assert_eq!(name.parse::<Protocol>().unwrap(), expected);
}

#[rstest]
#[case("lru", ReplacementPolicy::Lru)]
#[case("PLRU", ReplacementPolicy::Plru)]
#[case("fifo", ReplacementPolicy::Fifo)]
#[case("random", ReplacementPolicy::Random)]
fn policy_from_str(#[case] name: &str, #[case] expected: ReplacementPolicy) {
    assert_eq!(name.parse::<ReplacementPolicy>().unwrap(), expected);
}

#[rstest]
#[case("full_map", DirectoryType::FullMap)]
#[case("limited-no-broadcast", DirectoryType::LimitedNoBroadcast)]
#[case("LimitedBroadcast", DirectoryType::LimitedBroadcast)]
fn directory_type_from_str(#[case] name: &str, #[case] expected: DirectoryType) {
    assert_eq!(name.parse::<DirectoryType>().unwrap(), expected);
}

#[test]
fn unknown_names_are_rejected() {
    assert!(matches!("moesi".parse::<Protocol>(), Err(ConfigError::UnknownProtocol(_))));
    assert!(matches!("mru".parse::<ReplacementPolicy>(), Err(ConfigError::UnknownPolicy(_))));
    assert!(matches!("sparse".parse::<DirectoryType>(), Err(ConfigError::UnknownDirectoryType(_))));
    assert!(matches!("hbm".parse::<MemoryController>(), Err(ConfigError::UnknownController(_))));
}

// ══════════════════════════════════════════════════════════
// 4. Validation
// ══════════════════════════════════════════════════════════

#[rstest]
#[case(0)]
#[case(48)]
#[case(4)]
#[case(1024)]
fn line_size_must_be_sane_power_of_two(#[case] line: usize) {
    let mut config = Config::default();
    config.general.line_bytes = line;
    assert!(matches!(config.validate(), Err(ConfigError::LineSize(l)) if l == line));
}

#[test]
fn zero_cores_rejected() {
    let mut config = Config::default();
    config.general.num_cores = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Zero("general.num_cores"))));
}

#[test]
fn non_power_of_two_sets_rejected() {
    let mut config = Config::default();
    config.cache.l2.size_bytes = 3 * 64 * 8;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::Geometry { cache: "L2", .. })
    ));
}

#[test]
fn mandatory_levels_must_be_enabled() {
    let mut config = Config::default();
    config.cache.l2.enabled = false;
    assert!(matches!(config.validate(), Err(ConfigError::MissingLevel("L2"))));

    let mut config = Config::default();
    config.cache.l1_d.enabled = false;
    assert!(matches!(config.validate(), Err(ConfigError::MissingLevel("L1-D"))));
}

#[test]
fn sharing_must_divide_core_count() {
    let mut config = Config::default();
    config.general.num_cores = 6;
    config.cache.l2.shared_cores = 4;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::Sharing { cache: "L2", shared: 4, .. })
    ));
}

#[test]
fn outer_level_cannot_be_shared_by_fewer_cores() {
    let mut config = Config::default();
    config.general.num_cores = 4;
    config.cache.l2.shared_cores = 4;
    config.cache.l3.enabled = true;
    config.cache.l3.shared_cores = 2;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::Sharing { cache: "L3", .. })
    ));
}

#[test]
fn several_nodes_need_a_directory() {
    let mut config = Config::default();
    config.directory.enabled = false;
    assert!(matches!(config.validate(), Err(ConfigError::DirectoryRequired(2))));

    config.cache.l2.shared_cores = 2;
    assert!(config.validate().is_ok());
}

#[test]
fn directory_geometry_checked() {
    let mut config = Config::default();
    config.directory.total_entries = 100;
    config.directory.associativity = 16;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::DirectoryGeometry { total: 100, assoc: 16 })
    ));

    let mut config = Config::default();
    config.directory.homes = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Zero("directory.homes"))));
}

#[test]
fn outer_levels_and_nodes_follow_sharing() {
    let mut config = Config::default();
    config.general.num_cores = 8;
    config.cache.l2.shared_cores = 2;
    config.cache.l3.enabled = true;
    config.cache.l3.shared_cores = 4;
    let names: Vec<&str> = config.outer_levels().iter().map(|(n, _)| *n).collect();
    assert_eq!(names, vec!["L2", "L3"]);
    assert_eq!(config.num_nodes(), 2);
    assert!(config.validate().is_ok());
}

#[test]
fn error_messages_name_the_problem() {
    let err = ConfigError::Geometry {
        cache: "L1-D",
        size: 1000,
        ways: 3,
        line: 64,
    };
    assert_eq!(
        err.to_string(),
        "L1-D: 1000 bytes cannot be split into 3-way sets of 64-byte lines"
    );
    assert_eq!(
        ConfigError::DirectoryRequired(4).to_string(),
        "4 last-level cache instances need the directory to be enabled"
    );
}
