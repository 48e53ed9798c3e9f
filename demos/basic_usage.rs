// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic practice-store usage example.
//!
//! Demonstrates:
//! 1. Opening a store over a SQLite file and a JSON file
//! 2. Startup probe and migration
//! 3. Writing and reading practice data
//! 4. Recording vocabulary mistakes
//! 5. Export and backups
//! 6. Displaying metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use practice_store::{Store, StoreConfig, StoreState};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything the store records)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           practice-store: Basic Usage Example                 ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure the store
    // ─────────────────────────────────────────────────────────────────────────
    let dir = tempfile::TempDir::new()?;
    println!("📦 Configuring practice-store in {}", dir.path().display());

    let config = StoreConfig {
        // Tier A: structured store
        structured_url: Some(format!("sqlite://{}/practice.db?mode=rwc", dir.path().display())),
        // Tier B: flat JSON file with a small quota for the demo
        flat_path: Some(dir.path().join("practice.json").display().to_string()),
        flat_quota_bytes: 256 * 1024,
        writer_id: Some("demo-laptop".into()),
        ..Default::default()
    };
    let store = Store::new(config);
    println!("   State: {}", store.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Startup: probe backends, seed defaults, run migrations
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🚀 Starting store...");
    store.init().await;
    assert_eq!(store.state(), StoreState::Ready);

    let availability = store.availability().await;
    println!("   ├─ Structured: {}", availability.structured);
    println!("   ├─ Flat:       {}", availability.flat);
    println!("   ├─ Session:    {}", availability.session);
    println!("   └─ Primary:    {}", availability.primary());
    if let Some(report) = store.migration_report() {
        println!("   Seeded defaults: {:?}", report.seeded);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Practice data
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Recording practice sessions...");
    for (i, score) in [72, 85, 91].iter().enumerate() {
        store
            .append(
                "practice_records",
                json!({
                    "id": format!("session-{i}"),
                    "examId": "reading-p1",
                    "score": score,
                    "timestamp": 1_700_000_000_000i64 + i as i64 * 60_000,
                }),
            )
            .await?;
    }
    let records = store.get("practice_records", Vec::<serde_json::Value>::new()).await;
    println!("   └─ {} records stored", records.len());

    store
        .set("settings", &json!({"theme": "dark", "notifications": true}))
        .await?;
    let theme = store.get("settings", json!({})).await["theme"].clone();
    println!("   └─ Theme: {theme}");

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Vocabulary mistakes
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📚 Recording vocabulary mistakes...");
    for word in ["abundant", "scarce", "abundant"] {
        store.record_word_error("vocab_list_p1_errors", word, None).await?;
    }
    if let Some(list) = store.vocab_list("vocab_list_p1_errors").await {
        for entry in &list.words {
            println!("   └─ {} × {}", entry.word, entry.error_count);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Export and backups
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n💾 Export and backup...");
    let export = store.export_all().await;
    println!("   ├─ Exported {} keys", export.data.len());
    let backup = store.create_backup("demo").await?;
    println!("   └─ Backup: {}", backup.id);

    let info = store.storage_info().await;
    println!(
        "\n📊 Usage: {} bytes ({} mode, {})",
        info.used_bytes,
        info.mode,
        info.pressure.description()
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics in OTEL-compatible format
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();
    
    // Collect and sort metrics by name for cleaner output
    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];
    
    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        
        match value {
            DebugValue::Counter(v) => counters.push((name.to_string(), label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name.to_string(), label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                let avg = if count > 0 { sum / count as f64 } else { 0.0 };
                let min = samples.iter().map(|v| v.into_inner()).fold(f64::INFINITY, f64::min);
                let max = samples.iter().map(|v| v.into_inner()).fold(f64::NEG_INFINITY, f64::max);
                histograms.push((name.to_string(), label_str, count, sum, avg, min, max));
            }
        }
    }
    
    // Sort each category
    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));
    
    // Print counters
    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }
    
    // Print gauges
    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.2}", name, labels, value);
        }
    }
    
    // Print histograms
    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, labels, count, sum, avg, min, max) in &histograms {
            if *min == f64::INFINITY {
                println!("   │  └─ {}{} = (no samples)", name, labels);
            } else {
                println!("   │  └─ {}{}", name, labels);
                println!("   │     count={} sum={:.4} avg={:.4} min={:.4} max={:.4}", 
                    count, sum, avg, min, max);
            }
        }
    }
    
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}