use std::collections::BTreeMap;

// -----------------------------------------------------------------------------------------------
//  ProcedureCatalog
// -----------------------------------------------------------------------------------------------

/// The execution-relevant metadata of one stored procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureConfig {
  pub read_only: bool,
  pub is_system: bool,
  /// System procedures flagged every-partition run as single-partition
  /// procedures at every partition, and the results are deduplicated at the
  /// Coordinator.
  pub every_partition: bool,
}

impl ProcedureConfig {
  pub fn multi_partition(read_only: bool) -> ProcedureConfig {
    ProcedureConfig { read_only, is_system: false, every_partition: false }
  }

  pub fn every_partition_system(read_only: bool) -> ProcedureConfig {
    ProcedureConfig { read_only, is_system: true, every_partition: true }
  }
}

/// Maps procedure names to their metadata. An unknown name is a typed
/// not-found result; the Coordinator turns it into a client-facing error
/// rather than a crash.
#[derive(Debug, Clone, Default)]
pub struct ProcedureCatalog {
  procs: BTreeMap<String, ProcedureConfig>,
}

impl ProcedureCatalog {
  pub fn new() -> ProcedureCatalog {
    Default::default()
  }

  /// A catalog preloaded with the built-in every-partition system listing.
  pub fn with_system_listing() -> ProcedureCatalog {
    let mut catalog = ProcedureCatalog::new();
    catalog.register("@Statistics", ProcedureConfig::every_partition_system(true));
    catalog.register("@Quiesce", ProcedureConfig::every_partition_system(false));
    catalog
  }

  pub fn register(&mut self, name: &str, config: ProcedureConfig) {
    self.procs.insert(name.to_string(), config);
  }

  pub fn lookup(&self, name: &str) -> Option<&ProcedureConfig> {
    self.procs.get(name)
  }
}
