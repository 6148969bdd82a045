//! razercfg: command-line Razer mouse configuration tool.

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Parser, Subcommand};
use razercfg_core::buttonmapping::function_by_name;
use razercfg_core::context::Context;
use razercfg_core::model::{Frequency, LedState};
use razercfg_core::mouse::{Mouse, MouseInfo};
use razercfg_core::util::{string_to_bool, string_to_color, string_to_mode};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "razercfg", version, about = "Razer mouse configuration")]
struct Cli {
    /// Configuration file applied to every detected mouse.
    #[arg(long, global = true)]
    config: Option<String>,
    /// Do not emulate profiles on single-profile mice.
    #[arg(long, global = true)]
    no_profile_emu: bool,
    /// Debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Identity glob of the mouse to operate on, e.g. `*:Naga:*:*`.
    /// Defaults to the first mouse found.
    #[arg(short, long, global = true)]
    device: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List detected mice.
    List,
    /// Show capabilities and settings.
    Info {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
        /// Identity glob; every mouse when omitted.
        glob: Option<String>,
    },
    /// Select a DPI mapping by resolution (>= 100) or mapping id.
    SetRes {
        res: u32,
        /// Profile number, starting at 1. Defaults to the active profile.
        #[arg(long)]
        profile: Option<u32>,
        /// Axis id; every axis when omitted.
        #[arg(long)]
        axis: Option<u32>,
    },
    /// Set the scan frequency in Hz (125, 500 or 1000).
    SetFreq {
        hz: u32,
        #[arg(long)]
        profile: Option<u32>,
    },
    /// Switch an LED on or off.
    SetLed {
        name: String,
        state: String,
        #[arg(long)]
        profile: Option<u32>,
    },
    /// Set an LED mode (static, spectrum, breathing, wave, reaction).
    SetLedMode {
        name: String,
        mode: String,
        #[arg(long)]
        profile: Option<u32>,
    },
    /// Set an LED color as RRGGBB.
    SetLedColor {
        name: String,
        color: String,
        #[arg(long)]
        profile: Option<u32>,
    },
    /// Select the active profile, starting at 1.
    SetProfile { profile: u32 },
    /// Assign a function to a button, both by name or id.
    SetButton {
        button: String,
        function: String,
        #[arg(long)]
        profile: Option<u32>,
    },
    /// Push every setting of every mouse to the hardware.
    Reconfig,
    /// Load a configuration file and apply it to every mouse.
    ApplyConfig {
        /// Defaults to /etc/razer.conf.
        path: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn select<'a>(ctx: &'a mut Context, glob: Option<&str>) -> Result<&'a mut Mouse> {
    match glob {
        Some(g) => ctx
            .find_mouse_mut(g)
            .ok_or_else(|| anyhow!("no mouse matches {g:?}")),
        None => ctx
            .mice_mut()
            .first_mut()
            .ok_or_else(|| anyhow!("no supported Razer mouse found")),
    }
}

/// Zero-based profile from a one-based `--profile`, or the active profile.
fn profile_index(m: &Mouse, profile: Option<u32>) -> Result<u32> {
    match profile {
        Some(0) => bail!("profile numbers start at 1"),
        Some(p) => Ok(p - 1),
        None => Ok(m.active_profile().unwrap_or(0)),
    }
}

/// Run `f` under a claim, releasing (and committing) afterwards.
fn claimed<T>(m: &mut Mouse, f: impl FnOnce(&mut Mouse) -> razercfg_core::error::Result<T>) -> Result<T> {
    m.claim()
        .with_context(|| format!("failed to claim {}", m.idstr()))?;
    let res = f(m);
    let released = m.release();
    let value = res?;
    released?;
    Ok(value)
}

/// LED id and the profile it belongs to; `None` for a global LED.
fn find_led(m: &Mouse, name: &str, profile: Option<u32>) -> Result<(u32, Option<u32>)> {
    let profile = profile_index(m, profile)?;
    if let Some(led) = m.profile_leds(profile).iter().find(|l| l.name.eq_ignore_ascii_case(name)) {
        return Ok((led.id, Some(profile)));
    }
    m.global_leds()
        .iter()
        .find(|l| l.name.eq_ignore_ascii_case(name))
        .map(|l| (l.id, None))
        .ok_or_else(|| anyhow!("{} has no LED named {name:?}", m.idstr()))
}

fn print_info(info: &MouseInfo) {
    println!("{}", info.idstr);
    println!("  type:      {}", info.mouse_type);
    if let Some(fw) = &info.fw_version {
        println!("  firmware:  {fw}");
    }
    if info.flags.profile_emulated {
        println!("  profiles:  {} (emulated)", info.nr_profiles);
    } else {
        println!("  profiles:  {}", info.nr_profiles);
    }
    if let Some(active) = info.active_profile {
        println!("  active:    {}", active + 1);
    }
    if !info.freqs.is_empty() {
        let freqs: Vec<String> = info.freqs.iter().map(|f| f.as_hz().to_string()).collect();
        println!("  freqs:     {} Hz", freqs.join(", "));
    }
    for map in &info.dpimappings {
        let res: Vec<String> = map
            .res
            .iter()
            .filter(|r| **r != 0)
            .map(u32::to_string)
            .collect();
        println!(
            "  mapping {:>2}: {} DPI{}",
            map.nr,
            res.join("x"),
            if map.changeable { " (changeable)" } else { "" }
        );
    }
    for led in &info.leds {
        print!("  LED {}: {:?}", led.name, led.state);
        if let Some(mode) = led.mode {
            print!(", mode {mode}");
        }
        if let Some(color) = led.color {
            print!(", color {color}");
        }
        println!();
    }
    for p in &info.profiles {
        let name = p.name.as_deref().unwrap_or("");
        let marker = if p.active { " *" } else { "" };
        println!("  profile {}{marker} {name}", p.nr + 1);
        if let Some(freq) = p.freq {
            println!("    freq: {freq}");
        }
        for m in &p.dpimappings {
            match m.axis {
                Some(axis) => println!("    axis {axis}: mapping {}", m.mapping),
                None => println!("    mapping {}", m.mapping),
            }
        }
        for b in &p.buttons {
            println!("    {}: {}", b.button.name, b.function.name);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut ctx = Context::new(!cli.no_profile_emu).context("USB initialization failed")?;
    match &cli.command {
        Commands::ApplyConfig { path } => {
            ctx.load_config(path.as_deref().or(cli.config.as_deref()))
                .context("failed to load configuration")?;
        }
        _ => {
            if let Some(path) = &cli.config {
                ctx.load_config(Some(path))
                    .context("failed to load configuration")?;
            }
        }
    }
    ctx.rescan_mice()?;

    let device = cli.device.as_deref();
    match cli.command {
        Commands::List => {
            if ctx.mice().is_empty() {
                println!("No Razer mice found.");
            }
            for m in ctx.mice() {
                let emulated = if m.flags().profile_emulated {
                    " [emulated profiles]"
                } else {
                    ""
                };
                println!("{}  {}{emulated}", m.idstr(), m.mouse_type());
            }
        }
        Commands::Info { json, glob } => {
            let pattern = glob.as_deref().or(device);
            let infos: Vec<MouseInfo> = ctx
                .mice()
                .iter()
                .filter(|m| {
                    pattern.map_or(true, |g| razercfg_core::identity::glob_match(g, m.idstr()))
                })
                .map(Mouse::info)
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else if infos.is_empty() {
                println!("No matching mouse.");
            } else {
                infos.iter().for_each(print_info);
            }
        }
        Commands::SetRes { res, profile, axis } => {
            let m = select(&mut ctx, device)?;
            let profile = profile_index(m, profile)?;
            let mappings = m.supported_dpimappings();
            let map = mappings
                .iter()
                .find(|map| if res >= 100 { map.res[0] == res } else { map.nr == res })
                .ok_or_else(|| anyhow!("no DPI mapping for {res}"))?;
            let nr = map.nr;
            claimed(m, |m| m.set_dpimapping(profile, axis, nr))?;
            println!("{}: profile {} uses mapping {nr}", m.idstr(), profile + 1);
        }
        Commands::SetFreq { hz, profile } => {
            let freq = Frequency::from_hz(hz).ok_or_else(|| anyhow!("unsupported frequency {hz}"))?;
            let m = select(&mut ctx, device)?;
            let profile = profile_index(m, profile)?;
            claimed(m, |m| m.set_freq(profile, freq))?;
            println!("{}: scan frequency {freq}", m.idstr());
        }
        Commands::SetLed { name, state, profile } => {
            let on = string_to_bool(&state)?;
            let m = select(&mut ctx, device)?;
            let (led, profile) = find_led(m, &name, profile)?;
            claimed(m, |m| m.set_led_state(profile, led, LedState::from_bool(on)))?;
        }
        Commands::SetLedMode { name, mode, profile } => {
            let mode = string_to_mode(&mode)?;
            let m = select(&mut ctx, device)?;
            let (led, profile) = find_led(m, &name, profile)?;
            claimed(m, |m| m.set_led_mode(profile, led, mode))?;
        }
        Commands::SetLedColor { name, color, profile } => {
            let color = string_to_color(&color)?;
            let m = select(&mut ctx, device)?;
            let (led, profile) = find_led(m, &name, profile)?;
            claimed(m, |m| m.set_led_color(profile, led, color))?;
        }
        Commands::SetProfile { profile } => {
            let m = select(&mut ctx, device)?;
            let profile = profile_index(m, Some(profile))?;
            claimed(m, |m| m.set_active_profile(profile))?;
            println!("{}: profile {} active", m.idstr(), profile + 1);
        }
        Commands::SetButton { button, function, profile } => {
            let m = select(&mut ctx, device)?;
            let profile = profile_index(m, profile)?;
            let button = m
                .supported_buttons()
                .into_iter()
                .find(|b| b.name.eq_ignore_ascii_case(&button) || b.id.to_string() == button)
                .ok_or_else(|| anyhow!("{} has no button {button:?}", m.idstr()))?;
            let functions = m.supported_button_functions();
            let function = function_by_name(&functions, &function)
                .or_else(|| functions.iter().find(|f| f.id.to_string() == function))
                .copied()
                .ok_or_else(|| anyhow!("unknown button function {function:?}"))?;
            claimed(m, |m| m.set_button_function(profile, button.id, function.id))?;
            println!("{}: {} -> {}", m.idstr(), button.name, function.name);
        }
        Commands::Reconfig => {
            ctx.reconfig_mice()?;
        }
        Commands::ApplyConfig { .. } => {
            println!("Configuration applied to {} mice.", ctx.mice().len());
        }
    }

    Ok(())
}
