//! Outbound alert text formatting.

use soul_bus::{AlertData, Band};

fn severity_emoji(band: Band) -> &'static str {
    match band {
        Band::HighConviction => "🚨",
        Band::Actionable => "⚠️",
        _ => "ℹ️",
    }
}

/// Multiline HTML-safe alert body relayed to the chat gateway.
pub fn format_alert(alert: &AlertData) -> String {
    let mut text = format!(
        "{} <b>{}</b> ({})\nPrice: ${:.6} | Confidence: {}%\n",
        severity_emoji(alert.severity),
        alert.symbol,
        alert.severity,
        alert.price,
        alert.confidence,
    );
    for line in &alert.lines {
        text.push_str(&format!("• {}\n", line));
    }
    text.push_str(&format!(
        "Plan: {}\nRoute: {} | Est impact: {:.2}%",
        alert.plan, alert.sol_path, alert.est_impact_pct
    ));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn alert(band: Band) -> AlertData {
        AlertData {
            severity: band,
            mint: "MintA".to_string(),
            symbol: "ABC".to_string(),
            price: 1.05,
            confidence: 76,
            lines: vec!["Liq $600.0k".to_string(), "m1h +5.0%".to_string()],
            plan: "entry tranche ~7.6% of portfolio (cap 35% deployed)".to_string(),
            sol_path: "2 hops".to_string(),
            est_impact_pct: 0.3,
            ts: Utc::now(),
        }
    }

    #[test]
    fn test_format_includes_reasons_and_plan() {
        let text = format_alert(&alert(Band::Actionable));
        assert!(text.contains("⚠️"));
        assert!(text.contains("<b>ABC</b>"));
        assert!(text.contains("• Liq $600.0k"));
        assert!(text.contains("Plan: entry tranche"));
        assert!(text.contains("Est impact: 0.30%"));
    }

    #[test]
    fn test_high_conviction_gets_siren() {
        assert!(format_alert(&alert(Band::HighConviction)).starts_with("🚨"));
    }
}
