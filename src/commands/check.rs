//! `check` subcommand: validates the usage engine on this host.

use herakles_proc_usage::platform::ENGINE;
use herakles_proc_usage::system::{
    kernel_clock_ticks, kernel_page_size, CLOCK_TICKS_PER_SECOND, PAGE_SHIFT,
};
use herakles_proc_usage::start_platform_sampler;

use crate::config::{validate_effective_config, Config};

/// Validates system requirements and configuration
pub fn command_check(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Herakles Process Usage Exporter - System Check");
    println!("=================================================");
    println!("\n⚙️  Usage engine: {}", ENGINE);

    let mut all_ok = true;

    check_stat_source(&mut all_ok);
    check_kernel_constants();

    println!("\n📊 Taking a usage sample...");
    match start_platform_sampler().and_then(|sampler| sampler.usage()) {
        Ok(usage) => {
            println!(
                "   ✅ Sample successful: CPU={:.1}%, RSS={}KB, VSS={}KB",
                usage.cpu_percent,
                usage.rss_bytes / 1024,
                usage.vss_bytes / 1024
            );
            if !usage.is_complete() {
                println!("   ⚠️  Some fields could not be parsed");
            }
        }
        Err(e) if e.is_transient() => {
            println!("   ⚠️  Transient sample failure: {}", e);
        }
        Err(e) => {
            println!("   ❌ Sample failed: {}", e);
            all_ok = false;
        }
    }

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        std::process::exit(1);
    }
}

#[cfg(target_os = "linux")]
fn check_stat_source(all_ok: &mut bool) {
    use herakles_proc_usage::sampler::own_stat_path;
    use herakles_proc_usage::stat::StatRecord;

    let path = own_stat_path();
    println!("\n📁 Checking {}...", path.display());
    match std::fs::read(&path) {
        Ok(contents) => {
            println!("   ✅ Stat source readable");
            let record = StatRecord::parse(&contents);
            let fields = [
                ("utime", record.utime()),
                ("stime", record.stime()),
                ("starttime", record.start_ticks()),
                ("vsize", record.vss_bytes()),
                ("rss", record.rss_pages()),
            ];
            for (name, value) in fields {
                match value {
                    Some(v) => println!("   ✅ {:<10} {}", name, v),
                    None => {
                        println!("   ❌ {:<10} not parseable", name);
                        *all_ok = false;
                    }
                }
            }
        }
        Err(e) => {
            println!("   ❌ Cannot read stat source: {}", e);
            *all_ok = false;
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn check_stat_source(_all_ok: &mut bool) {
    println!("\n📁 No stat source on this platform");
}

fn check_kernel_constants() {
    println!("\n🧮 Checking kernel constants...");
    report_constant("clock ticks/s", kernel_clock_ticks(), CLOCK_TICKS_PER_SECOND);
    report_constant("page size", kernel_page_size(), 1 << PAGE_SHIFT);
}

fn report_constant(name: &str, actual: Option<i64>, assumed: i64) {
    match actual {
        Some(v) if v == assumed => println!("   ✅ {:<14} {}", name, v),
        Some(v) => println!(
            "   ⚠️  {:<14} {} (sampler assumes {}, values will be scaled wrong)",
            name, v, assumed
        ),
        None => println!("   ⚠️  {:<14} unknown (sampler assumes {})", name, assumed),
    }
}
