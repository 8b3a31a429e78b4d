//! Logical fixture and artifact paths of a suite.
//!
//! Every path is a pure join on the suite root, computed once when the run
//! starts, so a given checkout always yields the same paths.

use crate::interpolate::Placeholders;
use std::path::{Path, PathBuf};

pub const CONTRACT_SOLIDITY: &str = "contract.sol";
pub const CONTRACT_YUL: &str = "contract.yul";
pub const CONTRACT_ERAVM_ASSEMBLY: &str = "contract.zasm";
pub const CONTRACT_ZKASM: &str = "contract.zkasm";
pub const CONTRACT_LLVM_IR: &str = "contract.ll";
pub const CONTRACT_STANDARD_JSON: &str = "contract.json";

/// Bytecode artifact written per contract by `--bin --output-dir`.
pub const BIN_ARTIFACT: &str = "C.zbin";
/// EraVM assembly artifact written per contract by `--asm --output-dir`.
pub const ERAVM_ASSEMBLY_ARTIFACT: &str = "C.zasm";

/// Default fixture directory, relative to the suite root.
pub const DEFAULT_CONTRACTS_DIR: &str = "contracts";
/// Default artifact root, relative to the suite root.
pub const DEFAULT_OUTPUT_DIR: &str = "artifacts";

/// Resolved paths of a suite.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PathSet {
    pub root: PathBuf,
    pub contracts: PathBuf,
    pub output_dir: PathBuf,
    pub solidity: PathBuf,
    pub yul: PathBuf,
    pub eravm_assembly: PathBuf,
    pub zkasm: PathBuf,
    pub llvm_ir: PathBuf,
    pub standard_json: PathBuf,
}

impl PathSet {
    /// Resolve the suite paths below `root`.
    ///
    /// `contracts_dir` and `output_dir` may be relative to `root` or absolute.
    pub fn new(root: &Path, contracts_dir: &Path, output_dir: &Path) -> Self {
        let contracts = root.join(contracts_dir);
        Self {
            root: root.to_path_buf(),
            output_dir: root.join(output_dir),
            solidity: contracts.join("solidity").join(CONTRACT_SOLIDITY),
            yul: contracts.join("yul").join(CONTRACT_YUL),
            eravm_assembly: contracts.join("eravm").join(CONTRACT_ERAVM_ASSEMBLY),
            zkasm: contracts.join("zkasm").join(CONTRACT_ZKASM),
            llvm_ir: contracts.join("llvm").join(CONTRACT_LLVM_IR),
            standard_json: contracts.join("json").join(CONTRACT_STANDARD_JSON),
            contracts,
        }
    }

    /// Suite paths with the default layout.
    pub fn with_defaults(root: &Path) -> Self {
        Self::new(
            root,
            Path::new(DEFAULT_CONTRACTS_DIR),
            Path::new(DEFAULT_OUTPUT_DIR),
        )
    }

    /// Logical names usable as `${name}` in cases.
    pub fn placeholders(&self) -> Placeholders {
        let display = |p: &Path| p.display().to_string();
        [
            ("root", display(&self.root)),
            ("contracts", display(&self.contracts)),
            ("output_dir", display(&self.output_dir)),
            ("contracts.solidity", display(&self.solidity)),
            ("contracts.yul", display(&self.yul)),
            ("contracts.eravm", display(&self.eravm_assembly)),
            ("contracts.zkasm", display(&self.zkasm)),
            ("contracts.llvm", display(&self.llvm_ir)),
            ("contracts.json", display(&self.standard_json)),
            ("file.solidity", CONTRACT_SOLIDITY.to_string()),
            ("artifact.bin", BIN_ARTIFACT.to_string()),
            ("artifact.eravm_assembly", ERAVM_ASSEMBLY_ARTIFACT.to_string()),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }
}
