use colored::*;
use protoprobe_core::{
    catalog::{MethodInfo, ServiceInfo, ServiceMethods},
    invoker::UnaryResult,
    reflection::bridge::Discovery,
    tonic::Status,
};
use std::collections::BTreeMap;

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

pub struct ServiceList(pub Vec<ServiceInfo>);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)?;
        Ok(())
    }
}

impl From<serde_json::Value> for FormattedString {
    fn from(value: serde_json::Value) -> Self {
        FormattedString(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
    }
}

impl From<Status> for FormattedString {
    fn from(status: Status) -> Self {
        FormattedString(format!(
            "{} code={:?} message={:?}",
            "gRPC Failed:".red().bold(),
            status.code(),
            status.message()
        ))
    }
}

impl From<anyhow::Error> for FormattedString {
    fn from(err: anyhow::Error) -> Self {
        let mut out = format!("{}\n\n'{}'", "Error:".red().bold(), err);
        for cause in err.chain().skip(1) {
            out.push_str(&format!("\n  caused by: {cause}"));
        }
        FormattedString(out)
    }
}

impl From<ServiceList> for FormattedString {
    fn from(ServiceList(services): ServiceList) -> Self {
        if services.is_empty() {
            return FormattedString("No services found.".yellow().to_string());
        }

        let mut out = String::new();
        out.push_str("Available Services:\n");
        for svc in services {
            out.push_str(&format!(
                "  - {} {}\n",
                svc.full_name.green(),
                format!("({})", svc.short_name).dimmed()
            ));
        }
        FormattedString(out.trim_end().to_string())
    }
}

impl From<&MethodInfo> for FormattedString {
    fn from(method: &MethodInfo) -> Self {
        let input_stream = if method.request_stream.is_streaming() {
            format!("{} ", "stream".cyan())
        } else {
            "".to_string()
        };
        let output_stream = if method.response_stream.is_streaming() {
            format!("{} ", "stream".cyan())
        } else {
            "".to_string()
        };

        FormattedString(format!(
            "{} {}({}{}) {} ({}{});",
            "rpc".cyan(),
            method.name.green(),
            input_stream,
            method.request_type.yellow(),
            "returns".cyan(),
            output_stream,
            method.response_type.yellow()
        ))
    }
}

impl From<&ServiceMethods> for FormattedString {
    fn from(service: &ServiceMethods) -> Self {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {{\n",
            "service".cyan(),
            service.service.green()
        ));

        for method in &service.methods {
            out.push_str("  ");
            out.push_str(&FormattedString::from(method).0);
            out.push('\n');

            let body = serde_json::to_string_pretty(&method.request_body)
                .unwrap_or_else(|_| method.request_body.to_string());
            for line in body.lines() {
                out.push_str(&format!("    {}\n", format!("// {line}").dimmed()));
            }
            out.push('\n');
        }
        out.push('}');
        FormattedString(out)
    }
}

impl From<&BTreeMap<String, ServiceMethods>> for FormattedString {
    fn from(services: &BTreeMap<String, ServiceMethods>) -> Self {
        if services.is_empty() {
            return FormattedString("No services found.".yellow().to_string());
        }

        let blocks: Vec<_> = services
            .values()
            .map(|service| FormattedString::from(service).0)
            .collect();
        FormattedString(blocks.join("\n\n"))
    }
}

impl From<UnaryResult> for FormattedString {
    fn from(result: UnaryResult) -> Self {
        let mut out = FormattedString::from(result.result).0;

        if !result.metadata.is_empty() {
            out.push_str(&format!("\n\n{}\n", "Metadata:".cyan()));
            for entry in &result.metadata {
                out.push_str(&format!("  {}: {}\n", entry.key.yellow(), entry.value));
            }
            out.pop();
        }

        out.push_str(&format!(
            "\n\n{} code={} details={:?} {}",
            "Status:".cyan(),
            result.status.code.to_string().green(),
            result.status.details,
            format!("({} ms)", result.status.response_time).dimmed()
        ));

        FormattedString(out)
    }
}

impl From<&Discovery> for FormattedString {
    fn from(discovery: &Discovery) -> Self {
        let mut out = String::new();

        for (full_name, service) in &discovery.services {
            out.push_str(&format!(
                "{} {}\n",
                full_name.green(),
                format!("({})", service.proto_path.display()).dimmed()
            ));
            for method in &service.methods.methods {
                out.push_str("  ");
                out.push_str(&FormattedString::from(method).0);
                out.push('\n');
            }
        }

        if discovery.services.is_empty() {
            out.push_str(&format!("{}\n", "No services found.".yellow()));
        }

        out.push_str(&format!(
            "\n{} {}",
            "Schema saved, main file:".cyan(),
            discovery.protos.proto_path.display()
        ));

        FormattedString(out)
    }
}
