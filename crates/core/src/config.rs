//! Initial configuration from an INI file.
//!
//! Every section name is an identity glob. The first section, in file order,
//! that matches a mouse is applied to it right after the mouse is adopted:
//!
//! ```ini
//! [Mouse:*:*:1532-0016-*]
//! profile=1
//! res=1:1800
//! freq=1000
//! led=Scrollwheel:off
//! mode=GlowingLogo:breathing
//! color=GlowingLogo:00FF00
//! ```

use crate::error::{Error, Result};
use crate::identity::glob_match;
use crate::model::{Frequency, LedState};
use crate::mouse::Mouse;
use crate::util::{split_tuple, string_to_bool, string_to_color, string_to_int, string_to_mode};
use ini::{Ini, ParseOption};
use std::path::Path;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/razer.conf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    /// Items in file order.
    pub items: Vec<(String, String)>,
}

impl Section {
    pub fn get(&self, item: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(item))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_disabled(&self) -> bool {
        self.get("disabled")
            .and_then(|v| string_to_bool(v).ok())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    sections: Vec<Section>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::parse(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        info!(path = %path.display(), sections = config.sections.len(), "loaded config");
        Ok(config)
    }

    /// Items keep file order, repeated items included. Items outside any
    /// section are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let opt = ParseOption {
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_str_opt(text, opt).map_err(|e| Error::Config(e.to_string()))?;
        let mut sections = Vec::new();
        for (name, props) in ini.iter() {
            let Some(name) = name else {
                if !props.is_empty() {
                    warn!(items = props.len(), "config items outside of a section, ignoring");
                }
                continue;
            };
            sections.push(Section {
                name: name.to_string(),
                items: props
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }
        Ok(Self { sections })
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// First section whose glob matches `idstr`.
    pub fn find_section(&self, idstr: &str) -> Option<&Section> {
        self.sections.iter().find(|s| glob_match(&s.name, idstr))
    }
}

enum ItemError {
    /// Logged and skipped.
    Invalid(String),
    /// Logged; marks the whole section as failed.
    Failed(String),
}

type ItemResult<T = ()> = std::result::Result<T, ItemError>;

fn failed(e: impl std::fmt::Display) -> ItemError {
    ItemError::Failed(e.to_string())
}

/// A missing capability is not a config error.
fn setter(res: Result<()>) -> ItemResult {
    match res {
        Ok(()) => Ok(()),
        Err(Error::NotSupported(what)) => Err(ItemError::Invalid(format!("{what} not supported"))),
        Err(e) => Err(failed(e)),
    }
}

/// 1-based profile number to index.
fn profile_index(m: &Mouse, profile: i64) -> ItemResult<u32> {
    if profile < 1 || profile > i64::from(m.nr_profiles()) {
        return Err(failed(format!("no profile {profile}")));
    }
    Ok((profile - 1) as u32)
}

/// `[<profile>:]<value>`; the profile defaults to the active one.
fn profile_and_value(m: &Mouse, value: &str) -> ItemResult<(u32, i64)> {
    let (fields, complete) = split_tuple(value, ':', 2);
    if complete {
        let profile = string_to_int(&fields[0]).map_err(failed)?;
        let v = string_to_int(&fields[1]).map_err(failed)?;
        Ok((profile_index(m, profile)?, v))
    } else {
        let v = string_to_int(&fields[0]).map_err(failed)?;
        Ok((m.active_profile().unwrap_or(0), v))
    }
}

fn apply_res(m: &mut Mouse, value: &str) -> ItemResult {
    let (profile, res) = profile_and_value(m, value)?;
    if res < 1 {
        return Err(failed(format!("bad resolution {res}")));
    }
    let mappings = m.supported_dpimappings();
    if mappings.is_empty() {
        return Err(failed("no DPI mappings"));
    }
    let res = res as u32;
    let found = mappings.iter().find(|map| {
        if res >= 100 {
            map.res[0] == res
        } else {
            map.nr == res
        }
    });
    match found {
        Some(map) => setter(m.set_dpimapping(profile, None, map.nr)),
        None => Err(ItemError::Invalid(format!("no mapping for {res}"))),
    }
}

fn apply_freq(m: &mut Mouse, value: &str) -> ItemResult {
    let (profile, hz) = profile_and_value(m, value)?;
    let freq = u32::try_from(hz)
        .ok()
        .and_then(Frequency::from_hz)
        .filter(|f| m.supported_freqs().contains(f))
        .ok_or_else(|| failed(format!("unsupported frequency {hz}")))?;
    setter(m.set_freq(profile, freq))
}

/// `[<profile>:]<led>:<arg>`. Profile LEDs fall back to the global ones.
fn apply_led<F>(m: &mut Mouse, value: &str, set: F) -> ItemResult
where
    F: FnOnce(&mut Mouse, Option<u32>, u32, &str) -> ItemResult,
{
    let (fields, _) = split_tuple(value, ':', 3);
    if fields[0].is_empty() || fields[1].is_empty() {
        return Err(failed("expected <led>:<value>"));
    }
    let (profile, name, arg) = if fields[2].is_empty() {
        (None, &fields[0], &fields[1])
    } else {
        let p = string_to_int(&fields[0]).map_err(failed)?;
        (Some(profile_index(m, p)?), &fields[1], &fields[2])
    };
    let (scope, leds) = match profile {
        Some(p) => match m.profile_leds(p) {
            leds if leds.is_empty() => (None, m.global_leds()),
            leds => (Some(p), leds),
        },
        None => (None, m.global_leds()),
    };
    if leds.is_empty() {
        return Ok(());
    }
    let led = leds
        .iter()
        .find(|l| l.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| failed(format!("no LED {name:?}")))?;
    set(m, scope, led.id, arg)
}

fn apply_item(m: &mut Mouse, item: &str, value: &str) -> ItemResult {
    match item.to_ascii_lowercase().as_str() {
        "profile" => {
            let p = string_to_int(value).map_err(failed)?;
            let p = profile_index(m, p)?;
            setter(m.set_active_profile(p))
        }
        "res" => apply_res(m, value),
        "freq" => apply_freq(m, value),
        "led" => apply_led(m, value, |m, profile, led, arg| {
            let on = string_to_bool(arg).map_err(failed)?;
            setter(m.set_led_state(profile, led, LedState::from_bool(on)))
        }),
        "mode" => apply_led(m, value, |m, profile, led, arg| {
            let mode = string_to_mode(arg).map_err(failed)?;
            setter(m.set_led_mode(profile, led, mode))
        }),
        "color" => apply_led(m, value, |m, profile, led, arg| {
            let color = string_to_color(arg).map_err(failed)?;
            setter(m.set_led_color(profile, led, color))
        }),
        "disabled" => Ok(()),
        _ => Err(ItemError::Invalid("unknown item".into())),
    }
}

/// Apply the first matching section of `config` to `m`.
///
/// Every item runs, under one claim. Returns a `Config` error when any item
/// failed; unknown or unsupported items are only logged.
pub fn apply_initial_config(m: &mut Mouse, config: &Config) -> Result<()> {
    let Some(section) = config.find_section(m.idstr()) else {
        return Ok(());
    };
    if section.is_disabled() {
        debug!(idstr = %m.idstr(), section = %section.name, "initial config is disabled, not applying");
        return Ok(());
    }
    debug!(idstr = %m.idstr(), section = %section.name, "applying config section");
    m.claim()?;
    let mut error_status = false;
    for (item, value) in &section.items {
        match apply_item(m, item, value) {
            Ok(()) => {}
            Err(ItemError::Invalid(why)) => {
                warn!(section = %section.name, item = %item, "config item invalid: {}", why);
            }
            Err(ItemError::Failed(why)) => {
                error!(section = %section.name, item = %item, "config item invalid: {}", why);
                error_status = true;
            }
        }
    }
    if let Err(e) = m.release() {
        error!(idstr = %m.idstr(), "commit after config failed: {}", e);
        error_status = true;
    }
    if error_status {
        return Err(Error::Config(format!(
            "failed to apply initial config to \"{}\"",
            m.idstr()
        )));
    }
    info!(idstr = %m.idstr(), "applied initial config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mouse::mock::{Log, MockDriver};
    use crate::usb::mock::{context_for, MockDevice};
    use std::sync::{Arc, Mutex};

    fn mouse() -> (Mouse, Arc<Mutex<Log>>) {
        let dev = MockDevice::new(1, 5, 0x1532, 0x0016);
        let (_bus, ctx) = context_for(&dev);
        let (driver, log) = MockDriver::new(1);
        (Mouse::with_driver(ctx, Box::new(driver)).unwrap(), log)
    }

    #[test]
    fn parse_keeps_section_order_and_first_match_wins() {
        let cfg = Config::parse(
            "[Mouse:*:*:1532-0016-*]\nres=800\n\n[Mouse:*:001:*]\nfreq=125\n",
        )
        .unwrap();
        assert_eq!(cfg.sections().len(), 2);
        let s = cfg.find_section("Mouse:Mock:USB-001:1532-0016-0").unwrap();
        assert_eq!(s.get("res"), Some("800"));
        assert!(cfg.find_section("Mouse:Mock:USB-002:1532-0017-0").is_none());
    }

    #[test]
    fn values_may_contain_colons() {
        let cfg = Config::parse("[Mouse:*:*:*]\nled = 1:Scrollwheel:off\n").unwrap();
        assert_eq!(cfg.sections()[0].get("LED"), Some("1:Scrollwheel:off"));
    }

    #[test]
    fn section_items_are_applied_under_one_claim() {
        let (mut m, log) = mouse();
        let cfg = Config::parse(
            "[Mouse:*:*:1532-0016-*]\nres=800\nfreq=1:500\nled=scrollwheel:off\n",
        )
        .unwrap();
        apply_initial_config(&mut m, &cfg).unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.calls, vec!["dpi 0 None 1", "freq 0 500", "led None 0 Off"]);
        assert_eq!(log.commits, vec![false]);
        assert_eq!(m.claim_count(), 0);
    }

    #[test]
    fn repeated_items_are_all_applied_in_order() {
        let (mut m, log) = mouse();
        let cfg = Config::parse(
            "[Mouse:*:*:1532-0016-*]\nled=Scrollwheel:off\nfreq=500\nled=Scrollwheel:on\n",
        )
        .unwrap();
        let section = &cfg.sections()[0];
        assert_eq!(section.name, "Mouse:*:*:1532-0016-*");
        assert_eq!(section.items.len(), 3);
        apply_initial_config(&mut m, &cfg).unwrap();
        assert_eq!(
            log.lock().unwrap().calls,
            vec!["led None 0 Off", "freq 0 500", "led None 0 On"]
        );
    }

    #[test]
    fn items_before_the_first_section_are_ignored() {
        let cfg = Config::parse("freq=125\n# comment\n[*:*:*:*]\nres=800\n").unwrap();
        assert_eq!(cfg.sections().len(), 1);
        assert_eq!(cfg.sections()[0].items, vec![("res".to_string(), "800".to_string())]);
    }

    #[test]
    fn small_res_values_select_mapping_ids() {
        let (mut m, log) = mouse();
        let cfg = Config::parse("[*:*:*:*]\nres=1\n").unwrap();
        apply_initial_config(&mut m, &cfg).unwrap();
        assert_eq!(log.lock().unwrap().calls, vec!["dpi 0 None 1"]);
    }

    #[test]
    fn disabled_section_is_skipped() {
        let (mut m, log) = mouse();
        let cfg = Config::parse("[*:*:*:*]\ndisabled=yes\nfreq=125\n").unwrap();
        apply_initial_config(&mut m, &cfg).unwrap();
        assert!(log.lock().unwrap().calls.is_empty());
    }

    #[test]
    fn bad_items_fail_the_section_but_the_rest_still_runs() {
        let (mut m, log) = mouse();
        let cfg = Config::parse("[*:*:*:*]\nprofile=7\nbogus=1\nfreq=250\nled=Scrollwheel:off\n").unwrap();
        assert!(matches!(apply_initial_config(&mut m, &cfg), Err(Error::Config(_))));
        assert_eq!(log.lock().unwrap().calls, vec!["led None 0 Off"]);
    }

    #[test]
    fn unsupported_capabilities_are_ignored() {
        let (mut m, _log) = mouse();
        let cfg = Config::parse("[*:*:*:*]\nmode=Scrollwheel:breathing\nres=12000\n").unwrap();
        apply_initial_config(&mut m, &cfg).unwrap();
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::load(Path::new("/nonexistent/razer.conf")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
