//! Built-in organization registry: every org this binary knows how to
//! harvest, keyed by abbreviation. Adding a source means adding one entry
//! here; nothing else in the pipeline changes.

use std::sync::Arc;

use jobharvest_common::{HarvestError, OrgId, Organization};

use crate::adapter::JsonApiAdapter;
use crate::registry::{AdapterRegistry, RegistryBuilder};

struct Source {
    abbrev: &'static str,
    name: &'static str,
    base_url: &'static str,
    api_url: &'static str,
    zero_tolerant: bool,
}

const SOURCES: &[Source] = &[
    Source {
        abbrev: "ACER",
        name: "Agency for the Cooperation of Energy Regulators [ACER]",
        base_url: "https://acer.wd3.myworkdayjobs.com",
        api_url: "https://acer.wd3.myworkdayjobs.com/wday/cxs/acer/External/jobs",
        zero_tolerant: false,
    },
    Source {
        abbrev: "EBA",
        name: "European Banking Authority [EBA]",
        base_url: "https://eba.wd3.myworkdayjobs.com",
        api_url: "https://eba.wd3.myworkdayjobs.com/wday/cxs/eba/Vacancies/jobs",
        zero_tolerant: false,
    },
    Source {
        abbrev: "EDA",
        name: "European Defence Agency [EDA]",
        base_url: "https://eda.wd3.myworkdayjobs.com",
        api_url: "https://eda.wd3.myworkdayjobs.com/wday/cxs/eda/External/jobs",
        zero_tolerant: true,
    },
    Source {
        abbrev: "EIT",
        name: "European Institute of Innovation and Technology [EIT]",
        base_url: "https://eit.wd3.myworkdayjobs.com",
        api_url: "https://eit.wd3.myworkdayjobs.com/wday/cxs/eit/External/jobs",
        zero_tolerant: false,
    },
    Source {
        abbrev: "SATCEN",
        name: "European Union Satellite Centre [SATCEN]",
        base_url: "https://satcen.wd3.myworkdayjobs.com",
        api_url: "https://satcen.wd3.myworkdayjobs.com/wday/cxs/satcen/External/jobs",
        zero_tolerant: true,
    },
];

/// Registry of all built-in sources, in declaration order.
pub fn builtin_registry() -> Result<AdapterRegistry, HarvestError> {
    let mut builder = RegistryBuilder::new();
    for source in SOURCES {
        let org = Organization {
            id: OrgId::new(source.abbrev),
            name: source.name.to_string(),
            base_url: source.base_url.to_string(),
            allow_http: false,
            zero_tolerant: source.zero_tolerant,
            enabled: true,
            detail_delay_ms: None,
        };
        let adapter = Arc::new(JsonApiAdapter::new(
            source.abbrev,
            source.base_url,
            source.api_url,
        ));
        builder = builder.register(org, adapter)?;
    }
    Ok(builder.build())
}
