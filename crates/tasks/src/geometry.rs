//! Model domain descriptor.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use surfexp_config::{ResolvedConfig, Result};

/// Lambert conformal domain from the `domain.*` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Domain name
    pub name: String,
    /// Points in x
    pub nimax: u32,
    /// Points in y
    pub njmax: u32,
    /// Centre longitude
    pub xloncen: f64,
    /// Centre latitude
    pub xlatcen: f64,
    /// Grid spacing in x (m)
    pub xdx: f64,
    /// Grid spacing in y (m)
    pub xdy: f64,
    /// Extension zone in x
    pub ilone: u32,
    /// Extension zone in y
    pub ilate: u32,
    /// Projection reference longitude
    pub xlon0: f64,
    /// Projection reference latitude
    pub xlat0: f64,
}

impl Geometry {
    /// Keys a domain definition needs.
    pub const REQUIRED_KEYS: [&'static str; 10] = [
        "domain.nimax",
        "domain.njmax",
        "domain.xloncen",
        "domain.xlatcen",
        "domain.xdx",
        "domain.xdy",
        "domain.ilone",
        "domain.ilate",
        "domain.xlon0",
        "domain.xlat0",
    ];

    /// Read the domain from configuration.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        config.require(Self::REQUIRED_KEYS)?;
        Ok(Self {
            name: config
                .get_opt::<String>("domain.name")?
                .unwrap_or_else(|| "domain".to_string()),
            nimax: config.get_as("domain.nimax")?,
            njmax: config.get_as("domain.njmax")?,
            xloncen: config.get_as("domain.xloncen")?,
            xlatcen: config.get_as("domain.xlatcen")?,
            xdx: config.get_as("domain.xdx")?,
            xdy: config.get_as("domain.xdy")?,
            ilone: config.get_as("domain.ilone")?,
            ilate: config.get_as("domain.ilate")?,
            xlon0: config.get_as("domain.xlon0")?,
            xlat0: config.get_as("domain.xlat0")?,
        })
    }

    /// Total points.
    pub fn npoints(&self) -> u64 {
        u64::from(self.nimax) * u64::from(self.njmax)
    }

    /// Domain file content understood by the surface model drivers.
    pub fn to_domain_json(&self) -> Value {
        json!({
            "nam_conf_proj_grid": {
                "nimax": self.nimax,
                "njmax": self.njmax,
                "xloncen": self.xloncen,
                "xlatcen": self.xlatcen,
                "xdx": self.xdx,
                "xdy": self.xdy,
                "ilone": self.ilone,
                "ilate": self.ilate,
            },
            "nam_conf_proj": {
                "xlon0": self.xlon0,
                "xlat0": self.xlat0,
            },
            "nam_pgd_grid": {"cgrid": "CONF PROJ"},
        })
    }
}
