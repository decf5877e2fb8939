//! Prometheus text exposition format.
//!
//! Renders pool status into the Prometheus text exposition format for
//! scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use autopool_core::{AlarmState, LifecycleState, PoolStatus};

fn header(out: &mut String, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
}

/// Render a list of pool statuses into Prometheus text format.
///
/// Produces GAUGE metrics with `pool` labels.
pub fn render_prometheus(pools: &[PoolStatus]) -> String {
    let mut out = String::new();

    header(&mut out, "autopool_min_size", "Configured minimum pool size.");
    for p in pools {
        let _ = writeln!(
            out,
            "autopool_min_size{{pool=\"{}\"}} {}",
            p.snapshot.name, p.snapshot.min_size
        );
    }

    header(&mut out, "autopool_max_size", "Configured maximum pool size.");
    for p in pools {
        let _ = writeln!(
            out,
            "autopool_max_size{{pool=\"{}\"}} {}",
            p.snapshot.name, p.snapshot.max_size
        );
    }

    header(&mut out, "autopool_desired_capacity", "Capacity the pool converges to.");
    for p in pools {
        let _ = writeln!(
            out,
            "autopool_desired_capacity{{pool=\"{}\"}} {}",
            p.snapshot.name, p.snapshot.desired_capacity
        );
    }

    header(&mut out, "autopool_instances", "Instances by lifecycle state.");
    for p in pools {
        for (state, label) in [
            (LifecycleState::Pending, "pending"),
            (LifecycleState::InService, "in_service"),
            (LifecycleState::Draining, "draining"),
        ] {
            let _ = writeln!(
                out,
                "autopool_instances{{pool=\"{}\",state=\"{label}\"}} {}",
                p.snapshot.name,
                p.snapshot.count(state)
            );
        }
    }

    header(&mut out, "autopool_healthy_targets", "Targets currently receiving traffic.");
    for p in pools {
        let _ = writeln!(
            out,
            "autopool_healthy_targets{{pool=\"{}\"}} {}",
            p.snapshot.name, p.healthy_targets
        );
    }

    header(&mut out, "autopool_alarm_state", "1 if the policy alarm is firing.");
    for p in pools {
        for a in &p.alarms {
            let firing = u8::from(a.state == AlarmState::Alarm);
            let _ = writeln!(
                out,
                "autopool_alarm_state{{pool=\"{}\",policy=\"{}\"}} {firing}",
                p.snapshot.name, a.policy
            );
        }
    }

    header(
        &mut out,
        "autopool_alarm_consecutive_breaches",
        "Consecutive breaching periods per policy alarm.",
    );
    for p in pools {
        for a in &p.alarms {
            let _ = writeln!(
                out,
                "autopool_alarm_consecutive_breaches{{pool=\"{}\",policy=\"{}\"}} {}",
                p.snapshot.name, a.policy, a.consecutive_breaches
            );
        }
    }

    header(&mut out, "autopool_utilization_percent", "Last aggregated utilization datapoint.");
    for p in pools {
        if let Some(v) = p.last_datapoint {
            let _ = writeln!(
                out,
                "autopool_utilization_percent{{pool=\"{}\"}} {v:.2}",
                p.snapshot.name
            );
        }
    }

    out
}
