use crate::config::PrefixConfig;

/// Metric classes recognized by the namespace builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Timer,
    Gauge,
    Set,
}

/// Builds fully namespaced Graphite keys.
///
/// The composition strategy (legacy statsd layout vs. configured
/// prefixes) is decided once here, at sink construction, so the flush
/// path never branches on it per metric.
#[derive(Debug, Clone)]
pub struct NamespaceBuilder {
    global: Vec<String>,
    counter: Vec<String>,
    timer: Vec<String>,
    gauge: Vec<String>,
    set: Vec<String>,
    /// Either empty or `.{suffix}`, so it can be appended unconditionally.
    suffix: String,
    stats_prefix: String,
    sanitize: bool,
}

impl NamespaceBuilder {
    pub fn new(prefixes: &PrefixConfig) -> Self {
        let suffix = if prefixes.global_suffix.is_empty() {
            String::new()
        } else {
            format!(".{}", prefixes.global_suffix)
        };

        let (global, counter, timer, gauge, set) = if prefixes.legacy_namespace {
            (
                vec!["stats".to_string()],
                vec!["stats".to_string()],
                vec!["stats".to_string(), "timers".to_string()],
                vec!["stats".to_string(), "gauges".to_string()],
                vec!["stats".to_string(), "sets".to_string()],
            )
        } else {
            let root: Vec<String> = if prefixes.global_prefix.is_empty() {
                Vec::new()
            } else {
                vec![prefixes.global_prefix.clone()]
            };

            let with_kind = |kind_prefix: &str| {
                let mut parts = root.clone();
                if !kind_prefix.is_empty() {
                    parts.push(kind_prefix.to_string());
                }
                parts
            };

            (
                root.clone(),
                with_kind(&prefixes.counter),
                with_kind(&prefixes.timer),
                with_kind(&prefixes.gauge),
                with_kind(&prefixes.set),
            )
        };

        Self {
            global,
            counter,
            timer,
            gauge,
            set,
            suffix,
            stats_prefix: prefixes.stats_prefix.clone(),
            sanitize: prefixes.sanitize_keys,
        }
    }

    /// Fully namespaced key for a measurement of the given kind.
    pub fn key_for(&self, kind: MetricKind, key: &str) -> String {
        let parts = match kind {
            MetricKind::Counter => &self.counter,
            MetricKind::Timer => &self.timer,
            MetricKind::Gauge => &self.gauge,
            MetricKind::Set => &self.set,
        };

        let mut out = parts.join(".");
        if !out.is_empty() {
            out.push('.');
        }
        out.push_str(&self.sanitize_key(key));
        out.push_str(&self.suffix);
        out
    }

    /// Namespaced key for one of the sink's own health metrics.
    pub fn stats_key(&self, name: &str) -> String {
        let mut parts = self.global.clone();
        parts.push(self.stats_prefix.clone());
        format!("{}.graphiteStats.{}{}", parts.join("."), name, self.suffix)
    }

    /// Sanitizes a key for Graphite: whitespace runs become `_`, `/`
    /// becomes `-`, anything else outside `[a-zA-Z0-9_.-]` is dropped.
    fn sanitize_key(&self, key: &str) -> String {
        if !self.sanitize {
            return key.to_string();
        }

        let mut out = String::with_capacity(key.len());
        let mut in_whitespace = false;
        for c in key.chars() {
            if c.is_whitespace() {
                if !in_whitespace {
                    out.push('_');
                    in_whitespace = true;
                }
                continue;
            }
            in_whitespace = false;
            match c {
                '/' => out.push('-'),
                c if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') => out.push(c),
                _ => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes() -> PrefixConfig {
        PrefixConfig::default()
    }

    #[test]
    fn test_modern_gauge_key() {
        let ns = NamespaceBuilder::new(&prefixes());
        assert_eq!(
            ns.key_for(MetricKind::Gauge, "navigation.speedOverGround"),
            "stats.gauges.navigation.speedOverGround"
        );
    }

    #[test]
    fn test_modern_kind_prefixes() {
        let ns = NamespaceBuilder::new(&prefixes());
        assert_eq!(ns.key_for(MetricKind::Counter, "k"), "stats.counters.k");
        assert_eq!(ns.key_for(MetricKind::Timer, "k"), "stats.timers.k");
        assert_eq!(ns.key_for(MetricKind::Set, "k"), "stats.sets.k");
    }

    #[test]
    fn test_empty_prefixes_collapse() {
        let mut cfg = prefixes();
        cfg.global_prefix = String::new();
        cfg.gauge = String::new();
        let ns = NamespaceBuilder::new(&cfg);
        assert_eq!(ns.key_for(MetricKind::Gauge, "k"), "k");
    }

    #[test]
    fn test_global_suffix_is_dotted() {
        let mut cfg = prefixes();
        cfg.global_suffix = "boat1".to_string();
        let ns = NamespaceBuilder::new(&cfg);
        assert_eq!(ns.key_for(MetricKind::Gauge, "k"), "stats.gauges.k.boat1");
        assert!(ns.stats_key("last_flush").ends_with(".boat1"));
    }

    #[test]
    fn test_legacy_namespace_layout() {
        let mut cfg = prefixes();
        cfg.legacy_namespace = true;
        // Legacy mode ignores the configured prefixes.
        cfg.global_prefix = "ignored".to_string();
        let ns = NamespaceBuilder::new(&cfg);
        assert_eq!(ns.key_for(MetricKind::Counter, "k"), "stats.k");
        assert_eq!(ns.key_for(MetricKind::Timer, "k"), "stats.timers.k");
        assert_eq!(ns.key_for(MetricKind::Gauge, "k"), "stats.gauges.k");
        assert_eq!(ns.key_for(MetricKind::Set, "k"), "stats.sets.k");
    }

    #[test]
    fn test_stats_key() {
        let ns = NamespaceBuilder::new(&prefixes());
        assert_eq!(
            ns.stats_key("last_exception"),
            "stats.statsd.graphiteStats.last_exception"
        );
    }

    #[test]
    fn test_sanitize_key() {
        let ns = NamespaceBuilder::new(&prefixes());
        assert_eq!(
            ns.key_for(MetricKind::Gauge, "wind  speed/true m²"),
            "stats.gauges.wind_speed-true_m"
        );
    }

    #[test]
    fn test_sanitize_disabled_passes_through() {
        let mut cfg = prefixes();
        cfg.sanitize_keys = false;
        let ns = NamespaceBuilder::new(&cfg);
        assert_eq!(ns.key_for(MetricKind::Gauge, "a b"), "stats.gauges.a b");
    }
}
