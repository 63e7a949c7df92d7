// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements zone loading.

use std::fmt::Write;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};

use xfrd::db::{Catalog, ZoneEntry};
use xfrd::image;

use crate::config::ZoneConfig;

/// Loads the zones configured in `zones` into `catalog`.
///
/// Zones already in the catalog with the same kind and delta log size
/// are reloaded in place, which moves them to a new generation and
/// aborts their running transfers. Zones in the catalog that are no
/// longer configured are removed.
pub fn load(catalog: &Catalog, zones: &[ZoneConfig]) {
    let mut zones_failed = 0;

    for entry in catalog.entries() {
        let still_configured = zones
            .iter()
            .any(|z| &z.name.0 == entry.origin() && z.class.0 == entry.class());
        if !still_configured {
            info!("Removing {}/{}.", entry.origin(), entry.class());
            catalog.remove(entry.origin(), entry.class());
        }
    }

    for zone_config in zones {
        debug!(
            "Loading {}/{} from {}.",
            zone_config.name.0,
            zone_config.class.0,
            zone_config.image.display(),
        );
        let entry = match catalog.get(&zone_config.name.0, zone_config.class.0) {
            Some(entry) if entry.kind() == zone_config.kind.0 => entry,
            _ => {
                catalog
                    .insert(
                        zone_config.name.0.clone(),
                        zone_config.class.0,
                        zone_config.kind.0,
                        zone_config.max_log_len,
                    )
                    .0
            }
        };
        if let Err(e) = load_zone(&entry, zone_config) {
            let mut message = format!(
                "Failed to load {}/{}:",
                zone_config.name.0, zone_config.class.0
            );
            for (i, cause) in e.chain().enumerate() {
                write!(message, "\n[{}] {}", i + 1, cause).unwrap();
            }
            error!("{}", message);
            zones_failed += 1;
        }
    }

    if zones_failed > 0 {
        if zones_failed == 1 {
            error!("1 zone failed to load.");
        } else {
            error!("{} zones failed to load.", zones_failed);
        }
    }
}

/// Loads the image (and the IXFR log, if any) of a single zone.
fn load_zone(entry: &ZoneEntry, zone_config: &ZoneConfig) -> Result<()> {
    let records = image::read_zone_image(&zone_config.image, entry.origin(), entry.class())
        .with_context(|| format!("failed to read {}", zone_config.image.display()))?;
    let serial = entry
        .reset_zone_image(records)
        .context("failed to load the zone image")?;

    if let Some(ref ixfr_log) = zone_config.ixfr_log {
        let deltas = image::read_ixfr_log(ixfr_log)
            .with_context(|| format!("failed to read {}", ixfr_log.display()))?;
        if let Err(e) = seed_deltas(entry, deltas, serial) {
            // The zone itself is fine; it just can't answer IXFR.
            warn!(
                "Not using the IXFR log of {}/{}: {}",
                entry.origin(),
                entry.class(),
                e
            );
        }
    }

    info!(
        "Loaded {}/{} at serial {} with {} versions of history.",
        entry.origin(),
        entry.class(),
        serial,
        entry.delta_log_len()
    );
    Ok(())
}

/// Seeds the delta log of `entry`. The log must lead up to the serial
/// of the zone image.
fn seed_deltas(entry: &ZoneEntry, deltas: Vec<xfrd::xfr::Delta>, serial: u32) -> Result<()> {
    match deltas.last() {
        None => return Ok(()),
        Some(last) if last.to_serial != serial => {
            return Err(anyhow!(
                "the log ends at serial {}, but the image is at serial {}",
                last.to_serial,
                serial
            ));
        }
        Some(_) => (),
    }
    entry.seed_delta_log(deltas)?;
    Ok(())
}
