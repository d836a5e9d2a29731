//! DSI Debug Tools
//!
//! Inspect MIPI-DSI panel profiles, the link timing the transport derives
//! from them, and the command traffic it would put on the wire.
//!
//! # Features
//!
//! - **Panel Profiles**: Built-in descriptors for AUO, LG and Sharp panels,
//!   or any panel TOML file
//! - **Timing**: D-PHY timing, SOL delay, packet lengths and display clocks
//! - **Sequencer**: Decoded per-line packet program
//! - **Simulation**: Drive the transport against in-memory registers and
//!   dump the host FIFO traffic
//!
//! # Usage
//!
//! ```bash
//! # List built-in panel profiles
//! dsi-debug panels list
//!
//! # Show computed timing for a panel at its video rate
//! dsi-debug timing lg
//!
//! # Decode the packet sequencer program
//! dsi-debug sequence auo
//!
//! # Simulate a DCS write and dump the FIFO words
//! dsi-debug simulate write sharp --command 0x15 --reg 0x36 --data 0x00
//!
//! # Write a panel profile out as TOML
//! dsi-debug generate panel lg -o panel.toml
//! ```

mod panels;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use panels::{get_panel, panel_names, resolve_panel};
use tegra_dsi::hal::{ClockModule, ClockService};
use tegra_dsi::mock::{self, MockHandles};
use tegra_dsi::regs::dsi_reg;
use tegra_dsi::sequencer::{build_program, FORCE_LP};
use tegra_dsi::timing::{
    compute_packet_lengths, compute_phy_timing, compute_sol_delay, display_clock_config,
    ganged_pixel_correction,
};
use tegra_dsi::{DsiContext, PanelDescriptor, Point, Rect, VideoModeVariant};

/// DSI Debug Tools
///
/// Panel timing and command-traffic inspection for Tegra DSI
#[derive(Parser)]
#[command(name = "dsi-debug")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Inspect MIPI-DSI panel timing and simulated command traffic")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output (transport debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Panel profile operations
    #[command(subcommand)]
    Panels(PanelCommands),

    /// Show link timing derived from a panel
    Timing {
        /// Panel profile name or TOML file
        panel: String,

        /// PHY rate in kHz (default: the panel's video rate)
        #[arg(short, long)]
        freq: Option<u32>,
    },

    /// Decode the per-line packet sequencer program
    Sequence {
        /// Panel profile name or TOML file
        panel: String,
    },

    /// Drive the transport against simulated hardware
    #[command(subcommand)]
    Simulate(SimulateCommands),

    /// Generate panel configuration files
    #[command(subcommand)]
    Generate(GenerateCommands),
}

#[derive(Subcommand)]
enum PanelCommands {
    /// List all built-in panel profiles
    List,

    /// Show detailed information about a panel profile
    Show {
        /// Panel profile name or TOML file
        panel: String,
    },
}

#[derive(Subcommand)]
enum SimulateCommands {
    /// Initialize an instance and report the resulting link state
    Init {
        /// Panel profile name or TOML file
        panel: String,

        /// DSI instance
        #[arg(short, long, default_value_t = 0)]
        instance: usize,
    },

    /// Enable video and dump the programmed registers
    Enable {
        panel: String,

        #[arg(short, long, default_value_t = 0)]
        instance: usize,
    },

    /// Send one command packet in command mode
    Write {
        panel: String,

        /// DSI data type (e.g. 0x05 DCS short, 0x39 DCS long)
        #[arg(short, long, value_parser = parse_u8)]
        command: u8,

        /// DCS register
        #[arg(short, long, value_parser = parse_u8)]
        reg: u8,

        /// Payload bytes, comma separated
        #[arg(short, long, value_parser = parse_u8, value_delimiter = ',')]
        data: Vec<u8>,

        /// Send as a long packet
        #[arg(short, long)]
        long: bool,

        #[arg(short, long, default_value_t = 0)]
        instance: usize,
    },

    /// Read a DCS register, answering the BTA with the given words
    Read {
        panel: String,

        #[arg(short, long, value_parser = parse_u8)]
        reg: u8,

        /// Bytes to request
        #[arg(short = 'n', long, default_value_t = 1)]
        len: usize,

        /// Read FIFO words the simulated panel returns, comma separated
        #[arg(long, value_parser = parse_u32, value_delimiter = ',')]
        respond: Vec<u32>,

        #[arg(short, long, default_value_t = 0)]
        instance: usize,
    },

    /// Push a test pattern into panel frame memory
    Update {
        panel: String,

        #[arg(long, default_value_t = 16)]
        width: u32,

        #[arg(long, default_value_t = 16)]
        height: u32,

        /// Surface bits per pixel (16 or 24)
        #[arg(long, default_value_t = 24)]
        bpp: u32,

        #[arg(short, long, default_value_t = 0)]
        instance: usize,
    },
}

#[derive(Subcommand)]
enum GenerateCommands {
    /// Write a panel profile as TOML
    Panel {
        /// Panel profile name or TOML file
        panel: String,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_u8(s: &str) -> Result<u8, String> {
    parse_u32(s).and_then(|v| u8::try_from(v).map_err(|_| format!("{} does not fit in a byte", s)))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Panels(cmd) => handle_panels(cmd),
        Commands::Timing { panel, freq } => handle_timing(&panel, freq),
        Commands::Sequence { panel } => handle_sequence(&panel),
        Commands::Simulate(cmd) => handle_simulate(cmd),
        Commands::Generate(cmd) => handle_generate(cmd),
    }
}

fn handle_panels(cmd: PanelCommands) -> Result<()> {
    match cmd {
        PanelCommands::List => {
            println!("{}", "=".repeat(60));
            println!("{}", "Built-in Panel Profiles".cyan().bold());
            println!("{}", "=".repeat(60));

            for name in panel_names() {
                if let Some(panel) = get_panel(name) {
                    println!("\n  {}: {}", name.white().bold(), panel.description);
                    println!(
                        "    Resolution: {}x{} @ {} Hz",
                        panel.mode.width, panel.mode.height, panel.dsi.refresh_rate
                    );
                    println!(
                        "    Link: {} lanes, {:?}, {:?}",
                        panel.dsi.data_lanes, panel.dsi.video_mode, panel.dsi.data_format
                    );
                }
            }

            println!("\n{}", "=".repeat(60));
            println!(
                "Use {} to see detailed profile information",
                "dsi-debug panels show <panel>".cyan()
            );
        }

        PanelCommands::Show { panel } => {
            let panel = resolve_panel(&panel)?;
            print_panel(&panel);
        }
    }

    Ok(())
}

fn print_panel(panel: &PanelDescriptor) {
    let t = &panel.mode.timing;
    let dsi = &panel.dsi;

    println!("{}", "=".repeat(70));
    println!("{}", format!("Panel Profile: {}", panel.name).cyan().bold());
    println!("{}", "=".repeat(70));

    println!("\n{}", "Basic Information:".white().bold());
    println!("  Description: {}", panel.description);
    println!("  Display controller: {}", panel.controller);
    match panel.te_gpio {
        Some(pin) => println!("  TE GPIO: {}", pin),
        None => println!("  TE GPIO: {}", "none".dimmed()),
    }

    println!("\n{}", "Mode:".white().bold());
    println!(
        "  {}x{} {}bpp @ {} Hz{}",
        panel.mode.width,
        panel.mode.height,
        panel.mode.bpp,
        panel.mode.refresh_hz,
        if panel.mode.partial { " (partial)" } else { "" }
    );
    println!(
        "  Horizontal: sync {} bp {} active {} fp {} (total {})",
        t.h_sync_width,
        t.h_back_porch,
        t.h_disp_active,
        t.h_front_porch,
        t.htotal()
    );
    println!(
        "  Vertical:   sync {} bp {} active {} fp {} (total {})",
        t.v_sync_width,
        t.v_back_porch,
        t.v_disp_active,
        t.v_front_porch,
        t.vtotal()
    );

    println!("\n{}", "DSI Link:".white().bold());
    println!("  Variant: {:?}", panel.variant());
    println!("  Format: {:?}", dsi.data_format);
    println!("  Lanes: {}, virtual channel {}", dsi.data_lanes, dsi.virtual_channel);
    println!("  Video PHY rate: {} kHz", dsi.phy_freq_khz);
    println!(
        "  Command rates: LP {} kHz, HS {} kHz",
        dsi.lp_command_mode_freq_khz, dsi.hs_command_mode_freq_khz
    );
    println!("  HS clock: {:?}", dsi.hs_clock_control);
    if dsi.hs_support_for_frame_buffer {
        println!("  Frame-buffer updates in HS");
    }
    if dsi.phy_timing.is_some() {
        println!("  {}", "PHY timing overridden by panel".yellow());
    }

    println!("\n{}", "=".repeat(70));
}

fn handle_timing(panel: &str, freq: Option<u32>) -> Result<()> {
    let panel = resolve_panel(panel)?;
    let cfg = panel.dsi.normalized();
    let variant = panel.variant();
    let format = cfg.data_format;

    let timing = match variant {
        VideoModeVariant::Ganged { .. } => {
            let corr = ganged_pixel_correction(&panel.mode.timing, format, cfg.data_lanes);
            println!(
                "{} Ganged correction: active +{}, front porch +{}",
                "[*]".cyan().bold(),
                corr.active_corr,
                corr.fp_corr
            );
            corr.timing
        }
        _ => panel.mode.timing,
    };

    let clock = display_clock_config(
        variant,
        format,
        cfg.data_lanes,
        &timing,
        cfg.refresh_rate,
        cfg.phy_freq_khz,
        false,
    );
    let phy_khz = freq.unwrap_or(clock.dsi_khz);
    let phy = compute_phy_timing(&cfg, phy_khz, Some(&timing));
    let sol = compute_sol_delay(
        variant,
        format,
        cfg.data_lanes,
        &timing,
        cfg.refresh_rate,
        phy_khz,
    );
    let lengths = compute_packet_lengths(variant, format, &timing, 0);

    println!("{}", "=".repeat(70));
    println!("{}", format!("Link Timing: {} @ {} kHz", panel.name, phy_khz).cyan().bold());
    println!("{}", "=".repeat(70));

    println!("\n{}", "Clocks:".white().bold());
    println!("  DSI PLL: {} kHz", clock.dsi_khz);
    println!("  Pixel clock: {} kHz", clock.pixel_khz);
    println!("  Shift divider: {}", clock.shift_divider);

    println!("\n{}", "D-PHY (byte clocks):".white().bold());
    println!(
        "  THS: exit {} trail {} zero {} prepare {}",
        phy.ths_exit, phy.ths_trail, phy.tdat_zero, phy.ths_prepr
    );
    println!(
        "  TCLK: trail {} post {} zero {} prepare {} pre {}",
        phy.tclk_trail, phy.tclk_post, phy.tclk_zero, phy.tclk_prepare, phy.tclk_pre
    );
    println!("  TLPX {}  TWAKEUP {}", phy.ttlpx, phy.twakeup);
    println!(
        "  BTA: get {} sure {} go {}",
        phy.ta_get, phy.ta_sure, phy.ta_go
    );
    println!(
        "  Timeouts: HTX {:#06x} LRXH {:#06x} PR {:#06x} TA {:#06x}",
        phy.htx_timeout, phy.lrxh_timeout, phy.pr_timeout, phy.ta_timeout
    );
    println!(
        "  Registers: {:#010x} {:#010x} {:#010x} bta {:#010x}",
        phy.phy_timing_0(),
        phy.phy_timing_1(),
        phy.phy_timing_2(),
        phy.bta_timing()
    );

    println!("\n{}", "Video:".white().bold());
    println!("  SOL delay: {} byte clocks", sol.delay);
    if sol.adjusted_phy_khz != 0 {
        println!(
            "  Burst: PHY {} kHz, panel {} kHz",
            sol.adjusted_phy_khz, sol.panel_khz
        );
    }
    println!("  Packet lengths: {:?}", lengths.0);

    println!("\n{}", "=".repeat(70));
    Ok(())
}

fn handle_sequence(panel: &str) -> Result<()> {
    let panel = resolve_panel(panel)?;
    let variant = panel.variant();
    let program = build_program(variant, panel.dsi.data_format);

    println!("{}", "=".repeat(70));
    println!("{}", format!("Packet Sequence: {:?}", variant).cyan().bold());
    println!("{}", "=".repeat(70));

    const LINE_NAMES: [&str; 6] = [
        "vsync start",
        "vsync end / hsync",
        "hsync",
        "active",
        "hsync",
        "active",
    ];
    for (i, (lo, hi)) in program.slots.iter().enumerate() {
        let lp = if lo & FORCE_LP != 0 { " [LP]".yellow().to_string() } else { String::new() };
        println!(
            "\n  {} {}{}",
            format!("Line {}", i).white().bold(),
            LINE_NAMES[i].dimmed(),
            lp
        );
        println!("    LO {:#010x}: {}", lo, describe_half(*lo));
        println!("    HI {:#010x}: {}", hi, describe_half(*hi));
    }

    println!("\n{}", "=".repeat(70));
    Ok(())
}

/// Render the enabled sub-packets of one sequence half
fn describe_half(word: u32) -> String {
    let packets: Vec<String> = (0..3)
        .map(|pos| (word >> (pos * 10)) & 0x3ff)
        .filter(|raw| raw & (1 << 9) != 0)
        .map(|raw| format!("id {:#04x} len[{}]", (raw >> 3) & 0x3f, raw & 0x7))
        .collect();
    if packets.is_empty() {
        "-".to_string()
    } else {
        packets.join(", ")
    }
}

fn simulated_context() -> (DsiContext, MockHandles) {
    let (services, handles) = mock::services();
    (DsiContext::new(services), handles)
}

fn dump_fifo(label: &str, words: &[u32]) {
    println!(
        "\n{} {} ({} words)",
        "[TX]".cyan().bold(),
        label,
        words.len()
    );
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    hexdump::hexdump(&bytes);
}

fn handle_simulate(cmd: SimulateCommands) -> Result<()> {
    let (ctx, handles) = simulated_context();

    match cmd {
        SimulateCommands::Init { panel, instance } => {
            let panel = resolve_panel(&panel)?;
            ctx.trans_init(&panel, instance, 0)
                .with_context(|| format!("Failed to initialize DSI{}", instance))?;

            let regs = handles.registers(instance);
            println!(
                "{} DSI{} initialized for {}",
                "[OK]".green().bold(),
                instance,
                panel.name.white()
            );
            println!("  PHY rate: {} kHz", ctx.trans_get_phy_freq(&panel, instance)?);
            println!("  Register writes: {}", regs.writes().len());
            println!("  POWER_CONTROL: {:#x}", regs.value(dsi_reg::POWER_CONTROL));
            println!("  PHY_TIMING_0: {:#010x}", regs.value(dsi_reg::PHY_TIMING_0));
            println!("  BTA_TIMING: {:#010x}", regs.value(dsi_reg::BTA_TIMING));
        }

        SimulateCommands::Enable { panel, instance } => {
            let panel = resolve_panel(&panel)?;
            ctx.enable(panel.controller, &panel, instance)
                .with_context(|| format!("Failed to enable video on DSI{}", instance))?;

            let regs = handles.registers(instance);
            println!(
                "{} Video running on DSI{} at {} kHz",
                "[OK]".green().bold(),
                instance,
                handles.clock.current_khz(ClockModule::Dsi(instance))
            );
            for (name, offset) in [
                ("DSI_CONTROL", dsi_reg::DSI_CONTROL),
                ("HOST_DSI_CONTROL", dsi_reg::HOST_DSI_CONTROL),
                ("SOL_DELAY", dsi_reg::SOL_DELAY),
                ("MAX_THRESHOLD", dsi_reg::MAX_THRESHOLD),
                ("PKT_LEN_0_1", dsi_reg::PKT_LEN_0_1),
                ("PKT_LEN_2_3", dsi_reg::PKT_LEN_2_3),
                ("PKT_LEN_4_5", dsi_reg::PKT_LEN_4_5),
                ("PHY_TIMING_0", dsi_reg::PHY_TIMING_0),
            ] {
                println!("  {:<18} {:#010x}", name, regs.value(offset));
            }
            if panel.dsi.is_ganged() {
                println!(
                    "  GANGED_MODE_START  {} / {}",
                    handles.registers(0).value(dsi_reg::GANGED_MODE_START),
                    handles.registers(1).value(dsi_reg::GANGED_MODE_START)
                );
            }
        }

        SimulateCommands::Write {
            panel,
            command,
            reg,
            data,
            long,
            instance,
        } => {
            let panel = resolve_panel(&panel)?;
            ctx.trans_init(&panel, instance, 0)?;
            ctx.trans_enable_command_mode(&panel, instance)?;
            let regs = handles.registers(instance);
            regs.take_fifo_words();

            ctx.trans_write(&panel, command, reg, &data, instance, long)
                .context("Command write failed")?;
            dump_fifo(
                &format!("{:#04x} reg {:#04x}", command, reg),
                &regs.take_fifo_words(),
            );
        }

        SimulateCommands::Read {
            panel,
            reg,
            len,
            respond,
            instance,
        } => {
            let panel = resolve_panel(&panel)?;
            ctx.trans_init(&panel, instance, 0)?;
            ctx.trans_enable_command_mode(&panel, instance)?;
            let regs = handles.registers(instance);
            regs.take_fifo_words();
            if !respond.is_empty() {
                regs.respond_to_bta(&respond);
            }

            let mut buf = vec![0u8; len.max(1)];
            let result = ctx.trans_read(&panel, reg, &mut buf, instance, len > 2);
            dump_fifo("read request", &regs.take_fifo_words());
            match result {
                Ok(n) => {
                    println!(
                        "\n{} {} bytes from {:#04x}: {:02x?}",
                        "[RX]".green().bold(),
                        n,
                        reg,
                        &buf[..n]
                    );
                }
                Err(e) => {
                    println!("\n{} {}", "[WARNING]".yellow(), e);
                    println!("  Buffer: {:02x?}", buf);
                }
            }
        }

        SimulateCommands::Update {
            panel,
            width,
            height,
            bpp,
            instance,
        } => {
            let panel = resolve_panel(&panel)?;
            ctx.trans_init(&panel, instance, 0)?;
            ctx.trans_enable_command_mode(&panel, instance)?;
            let regs = handles.registers(instance);
            regs.take_fifo_words();

            let bytes_pp = bpp.div_ceil(8) as usize;
            let surface: Vec<u8> = (0..width as usize * height as usize * bytes_pp)
                .map(|i| i as u8)
                .collect();
            let update = Rect {
                left: 0,
                top: 0,
                right: width.saturating_sub(1),
                bottom: height.saturating_sub(1),
            };
            ctx.trans_update(
                &panel,
                &surface,
                width,
                height,
                bpp,
                Point::default(),
                instance,
                update,
            )
            .context("Frame update failed")?;

            let words = regs.take_fifo_words();
            println!(
                "{} {}x{} update: {} bytes of pixels, {} FIFO words",
                "[OK]".green().bold(),
                width,
                height,
                surface.len(),
                words.len()
            );
            let preview = words.len().min(32);
            dump_fifo("first words", &words[..preview]);
        }
    }

    Ok(())
}

fn handle_generate(cmd: GenerateCommands) -> Result<()> {
    match cmd {
        GenerateCommands::Panel { panel, output } => {
            let panel = resolve_panel(&panel)?;
            let text = panel.to_toml_string()?;

            if let Some(path) = output {
                std::fs::write(&path, &text)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!(
                    "{} Panel profile written to {}",
                    "[OK]".green().bold(),
                    path.display()
                );
            } else {
                println!("{}", text);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_u8("0x2c"), Ok(0x2c));
        assert_eq!(parse_u8("17"), Ok(17));
        assert!(parse_u8("0x100").is_err());
        assert_eq!(parse_u32("0x0000_9c21"), Ok(0x9c21));
        assert!(parse_u32("zz").is_err());
    }

    #[test]
    fn test_describe_half() {
        let program = build_program(VideoModeVariant::DcDrivenCommand, tegra_dsi::DataFormat::Packed24);
        assert_eq!(describe_half(program.slots[0].0), "-");
        assert_eq!(
            describe_half(program.slots[3].0),
            "id 0x39 len[3], id 0x08 len[7]"
        );
    }

    #[test]
    fn test_cli_parses_write() {
        let cli = Cli::try_parse_from([
            "dsi-debug", "simulate", "write", "lg", "--command", "0x39", "--reg", "0x2a",
            "--data", "0,0,2,0xcf", "--long",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate(SimulateCommands::Write { data, long, reg, .. }) => {
                assert_eq!(data, vec![0, 0, 2, 0xcf]);
                assert!(long);
                assert_eq!(reg, 0x2a);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_simulated_write_reaches_fifo() {
        let (ctx, handles) = simulated_context();
        let panel = resolve_panel("sharp").unwrap();
        ctx.trans_init(&panel, 0, 0).unwrap();
        ctx.trans_enable_command_mode(&panel, 0).unwrap();
        handles.registers(0).take_fifo_words();

        ctx.trans_write(&panel, 0x15, 0x36, &[0x08], 0, false).unwrap();
        assert_eq!(handles.registers(0).take_fifo_words(), vec![0x0008_3615]);
    }
}
