//! Prometheus text-format exporter.

use std::fmt::Write;
use std::sync::Arc;

use super::collector::MetricsCollector;

/// Exports collector snapshots in the Prometheus text format.
pub struct PrometheusExporter {
    collector: Arc<MetricsCollector>,
    namespace: String,
}

impl PrometheusExporter {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self::with_namespace(collector, "vidra")
    }

    pub fn with_namespace(collector: Arc<MetricsCollector>, namespace: impl Into<String>) -> Self {
        Self {
            collector,
            namespace: namespace.into(),
        }
    }

    /// Render the current snapshot.
    pub fn export(&self) -> String {
        let snapshot = self.collector.snapshot();
        let mut output = String::new();

        self.write_counter(
            &mut output,
            "jobs_enqueued_total",
            "Total jobs accepted and queued",
            snapshot.jobs_enqueued_total,
        );
        self.write_counter(
            &mut output,
            "jobs_deduplicated_total",
            "Total enqueues answered with an existing job",
            snapshot.jobs_deduplicated_total,
        );
        self.write_counter(
            &mut output,
            "jobs_rejected_total",
            "Total enqueues rejected",
            snapshot.jobs_rejected_total,
        );

        self.write_gauge(
            &mut output,
            "active_jobs",
            "Jobs currently being processed",
            snapshot.active_jobs,
        );
        self.write_counter(
            &mut output,
            "jobs_completed_total",
            "Total jobs finished successfully",
            snapshot.jobs_completed_total,
        );
        self.write_counter(
            &mut output,
            "jobs_cancelled_total",
            "Total jobs cancelled",
            snapshot.jobs_cancelled_total,
        );

        for (kind, count) in &snapshot.job_errors {
            self.write_counter_with_labels(
                &mut output,
                "job_errors_total",
                "Total failed jobs by failure kind",
                *count,
                &[("kind", kind)],
            );
        }

        self.write_counter(
            &mut output,
            "job_duration_ms_total",
            "Total processing time of finished jobs in milliseconds",
            snapshot.job_duration_total_ms,
        );
        self.write_counter(
            &mut output,
            "artifacts_stored_total",
            "Total artifacts composed and stored",
            snapshot.artifacts_stored_total,
        );
        self.write_counter(
            &mut output,
            "download_bytes_total",
            "Total bytes of finished artifacts",
            snapshot.download_bytes_total,
        );

        output
    }

    fn write_counter(&self, output: &mut String, name: &str, help: &str, value: u64) {
        self.write_metric(output, name, help, "counter", value, &[]);
    }

    fn write_gauge(&self, output: &mut String, name: &str, help: &str, value: u64) {
        self.write_metric(output, name, help, "gauge", value, &[]);
    }

    fn write_counter_with_labels(
        &self,
        output: &mut String,
        name: &str,
        help: &str,
        value: u64,
        labels: &[(&str, &str)],
    ) {
        self.write_metric(output, name, help, "counter", value, labels);
    }

    fn write_metric(
        &self,
        output: &mut String,
        name: &str,
        help: &str,
        kind: &str,
        value: u64,
        labels: &[(&str, &str)],
    ) {
        let full_name = format!("{}_{}", self.namespace, name);

        let _ = writeln!(output, "# HELP {full_name} {help}");
        let _ = writeln!(output, "# TYPE {full_name} {kind}");

        if labels.is_empty() {
            let _ = writeln!(output, "{full_name} {value}");
        } else {
            let rendered: Vec<String> = labels
                .iter()
                .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "\\\"")))
                .collect();
            let _ = writeln!(output, "{full_name}{{{}}} {value}", rendered.join(","));
        }
    }
}
