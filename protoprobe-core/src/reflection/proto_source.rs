//! # Proto Source Rendering
//!
//! Turns a `FileDescriptorProto` back into `.proto` source text that `protoc` (or `protox`)
//! accepts, so descriptors obtained through reflection can be persisted and reloaded like any
//! hand-written schema.
//!
//! Type references are written fully-qualified with their leading dot, which keeps them
//! unambiguous regardless of the package they are rendered into. Comments and most options
//! are not carried by reflection descriptors in a useful form and are not rendered.
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    ServiceDescriptorProto,
    field_descriptor_proto::{Label, Type},
};
use std::fmt::{self, Write};

const INDENT: &str = "  ";
const MAX_FIELD_NUMBER: i32 = 536_870_911;

/// Renders `file` as proto source.
pub fn to_proto_source(file: &FileDescriptorProto) -> String {
    ProtoSource(file).to_string()
}

/// `Display` adapter over a file descriptor.
pub struct ProtoSource<'a>(pub &'a FileDescriptorProto);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Syntax {
    Proto2,
    Proto3,
    Editions,
}

impl Syntax {
    fn of(file: &FileDescriptorProto) -> Self {
        match file.syntax() {
            "proto3" => Syntax::Proto3,
            "editions" => Syntax::Editions,
            _ => Syntax::Proto2,
        }
    }
}

impl fmt::Display for ProtoSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.0;
        let syntax = Syntax::of(file);

        match syntax {
            Syntax::Proto2 => writeln!(f, "syntax = \"proto2\";")?,
            Syntax::Proto3 => writeln!(f, "syntax = \"proto3\";")?,
            Syntax::Editions => writeln!(f, "edition = \"2023\";")?,
        }

        if !file.package().is_empty() {
            writeln!(f, "\npackage {};", file.package())?;
        }

        if !file.dependency.is_empty() {
            writeln!(f)?;
        }
        for (index, dependency) in file.dependency.iter().enumerate() {
            let index = index as i32;
            let modifier = if file.public_dependency.contains(&index) {
                "public "
            } else if file.weak_dependency.contains(&index) {
                "weak "
            } else {
                ""
            };
            writeln!(f, "import {modifier}\"{}\";", escape(dependency))?;
        }

        let mut out = String::new();
        for message in &file.message_type {
            out.push('\n');
            write_message(&mut out, message, syntax, 0)?;
        }
        for enumeration in &file.enum_type {
            out.push('\n');
            write_enum(&mut out, enumeration, 0)?;
        }
        if !file.extension.is_empty() {
            out.push('\n');
            write_extensions(&mut out, &file.extension, syntax, 0)?;
        }
        for service in &file.service {
            out.push('\n');
            write_service(&mut out, service)?;
        }

        f.write_str(&out)
    }
}

fn write_message(
    out: &mut String,
    message: &DescriptorProto,
    syntax: Syntax,
    depth: usize,
) -> fmt::Result {
    let pad = INDENT.repeat(depth);
    let inner = INDENT.repeat(depth + 1);
    writeln!(out, "{pad}message {} {{", message.name())?;

    for nested in message.nested_type.iter().filter(|m| !is_map_entry(m)) {
        write_message(out, nested, syntax, depth + 1)?;
    }
    for enumeration in &message.enum_type {
        write_enum(out, enumeration, depth + 1)?;
    }

    let mut rendered_oneofs = Vec::new();
    for field in &message.field {
        match real_oneof(message, field) {
            Some(index) if rendered_oneofs.contains(&index) => {}
            Some(index) => {
                rendered_oneofs.push(index);
                let name = message.oneof_decl[index].name();
                writeln!(out, "{inner}oneof {name} {{")?;
                for member in message
                    .field
                    .iter()
                    .filter(|f| real_oneof(message, f) == Some(index))
                {
                    write_field(out, message, member, syntax, depth + 2, true)?;
                }
                writeln!(out, "{inner}}}")?;
            }
            None => write_field(out, message, field, syntax, depth + 1, false)?,
        }
    }

    if !message.extension_range.is_empty() {
        let ranges: Vec<_> = message
            .extension_range
            .iter()
            .map(|r| range(r.start(), r.end() - 1))
            .collect();
        writeln!(out, "{inner}extensions {};", ranges.join(", "))?;
    }
    if !message.extension.is_empty() {
        write_extensions(out, &message.extension, syntax, depth + 1)?;
    }

    let ranges: Vec<_> = message
        .reserved_range
        .iter()
        .map(|r| range(r.start(), r.end() - 1))
        .collect();
    write_reserved(out, &ranges, &message.reserved_name, &inner)?;

    writeln!(out, "{pad}}}")
}

fn write_field(
    out: &mut String,
    message: &DescriptorProto,
    field: &FieldDescriptorProto,
    syntax: Syntax,
    depth: usize,
    in_oneof: bool,
) -> fmt::Result {
    let pad = INDENT.repeat(depth);

    if let Some(entry) = map_entry_of(message, field) {
        let key = entry.field.iter().find(|f| f.number() == 1);
        let value = entry.field.iter().find(|f| f.number() == 2);
        if let (Some(key), Some(value)) = (key, value) {
            return writeln!(
                out,
                "{pad}map<{}, {}> {} = {};",
                type_name(key),
                type_name(value),
                field.name(),
                field.number()
            );
        }
    }

    let label = if in_oneof {
        ""
    } else {
        match (field.label(), syntax) {
            (Label::Repeated, _) => "repeated ",
            (Label::Required, _) => "required ",
            (Label::Optional, Syntax::Proto2) => "optional ",
            (Label::Optional, _) if field.proto3_optional() => "optional ",
            (Label::Optional, _) => "",
        }
    };

    write!(
        out,
        "{pad}{label}{} {} = {}",
        type_name(field),
        field.name(),
        field.number()
    )?;

    let options = field_options(field);
    if !options.is_empty() {
        write!(out, " [{}]", options.join(", "))?;
    }

    writeln!(out, ";")
}

fn field_options(field: &FieldDescriptorProto) -> Vec<String> {
    let mut options = Vec::new();

    if let Some(default) = &field.default_value {
        let value = match field.r#type() {
            Type::String => format!("\"{}\"", escape(default)),
            Type::Bytes => format!("\"{default}\""),
            _ => default.clone(),
        };
        options.push(format!("default = {value}"));
    }

    if let Some(opts) = &field.options {
        if let Some(packed) = opts.packed {
            options.push(format!("packed = {packed}"));
        }
        if opts.deprecated() {
            options.push("deprecated = true".to_string());
        }
    }

    options
}

fn write_extensions(
    out: &mut String,
    extensions: &[FieldDescriptorProto],
    syntax: Syntax,
    depth: usize,
) -> fmt::Result {
    let pad = INDENT.repeat(depth);
    let mut extendees: Vec<&str> = Vec::new();
    for field in extensions {
        if !extendees.contains(&field.extendee()) {
            extendees.push(field.extendee());
        }
    }

    let scope = DescriptorProto::default();
    for extendee in extendees {
        writeln!(out, "{pad}extend {extendee} {{")?;
        for field in extensions.iter().filter(|f| f.extendee() == extendee) {
            write_field(out, &scope, field, syntax, depth + 1, false)?;
        }
        writeln!(out, "{pad}}}")?;
    }

    Ok(())
}

fn write_enum(out: &mut String, enumeration: &EnumDescriptorProto, depth: usize) -> fmt::Result {
    let pad = INDENT.repeat(depth);
    let inner = INDENT.repeat(depth + 1);
    writeln!(out, "{pad}enum {} {{", enumeration.name())?;

    if enumeration
        .options
        .as_ref()
        .is_some_and(|o| o.allow_alias())
    {
        writeln!(out, "{inner}option allow_alias = true;")?;
    }

    for value in &enumeration.value {
        writeln!(out, "{inner}{} = {};", value.name(), value.number())?;
    }

    // Enum reserved ranges are inclusive on both ends.
    let ranges: Vec<_> = enumeration
        .reserved_range
        .iter()
        .map(|r| range(r.start(), r.end()))
        .collect();
    write_reserved(out, &ranges, &enumeration.reserved_name, &inner)?;

    writeln!(out, "{pad}}}")
}

fn write_service(out: &mut String, service: &ServiceDescriptorProto) -> fmt::Result {
    writeln!(out, "service {} {{", service.name())?;

    for method in &service.method {
        let input_stream = if method.client_streaming() { "stream " } else { "" };
        let output_stream = if method.server_streaming() { "stream " } else { "" };

        writeln!(
            out,
            "{INDENT}rpc {}({input_stream}{}) returns ({output_stream}{});",
            method.name(),
            method.input_type(),
            method.output_type()
        )?;
    }

    writeln!(out, "}}")
}

fn write_reserved(out: &mut String, ranges: &[String], names: &[String], pad: &str) -> fmt::Result {
    if !ranges.is_empty() {
        writeln!(out, "{pad}reserved {};", ranges.join(", "))?;
    }
    if !names.is_empty() {
        let names: Vec<_> = names.iter().map(|n| format!("\"{}\"", escape(n))).collect();
        writeln!(out, "{pad}reserved {};", names.join(", "))?;
    }
    Ok(())
}

/// An inclusive range as written in `reserved` and `extensions` statements.
fn range(start: i32, end: i32) -> String {
    if end >= MAX_FIELD_NUMBER && start != end {
        format!("{start} to max")
    } else if start == end {
        start.to_string()
    } else {
        format!("{start} to {end}")
    }
}

fn type_name(field: &FieldDescriptorProto) -> String {
    match field.r#type() {
        Type::Double => "double".to_string(),
        Type::Float => "float".to_string(),
        Type::Int64 => "int64".to_string(),
        Type::Uint64 => "uint64".to_string(),
        Type::Int32 => "int32".to_string(),
        Type::Fixed64 => "fixed64".to_string(),
        Type::Fixed32 => "fixed32".to_string(),
        Type::Bool => "bool".to_string(),
        Type::String => "string".to_string(),
        Type::Bytes => "bytes".to_string(),
        Type::Uint32 => "uint32".to_string(),
        Type::Sfixed32 => "sfixed32".to_string(),
        Type::Sfixed64 => "sfixed64".to_string(),
        Type::Sint32 => "sint32".to_string(),
        Type::Sint64 => "sint64".to_string(),
        Type::Message | Type::Enum | Type::Group => field.type_name().to_string(),
    }
}

fn is_map_entry(message: &DescriptorProto) -> bool {
    message.options.as_ref().is_some_and(|o| o.map_entry())
}

/// The synthesized entry message behind a map field, if `field` is one.
fn map_entry_of<'a>(
    message: &'a DescriptorProto,
    field: &FieldDescriptorProto,
) -> Option<&'a DescriptorProto> {
    if field.label() != Label::Repeated || field.r#type() != Type::Message {
        return None;
    }

    let entry_name = field.type_name().rsplit('.').next()?;
    message
        .nested_type
        .iter()
        .find(|nested| nested.name() == entry_name && is_map_entry(nested))
}

/// The index of the oneof `field` belongs to, unless it is the synthetic oneof of a
/// proto3 `optional` field.
fn real_oneof(message: &DescriptorProto, field: &FieldDescriptorProto) -> Option<usize> {
    if field.proto3_optional() {
        return None;
    }

    let index = usize::try_from(field.oneof_index?).ok()?;
    (index < message.oneof_decl.len()).then_some(index)
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_reflect::DescriptorPool;
    use std::fs;

    fn compile(files: &[(&str, &str)], root: &str) -> prost_types::FileDescriptorSet {
        let dir = tempfile::tempdir().unwrap();
        for (name, source) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, source).unwrap();
        }

        protox::compile([root], [dir.path()]).unwrap()
    }

    fn file<'a>(set: &'a prost_types::FileDescriptorSet, name: &str) -> &'a FileDescriptorProto {
        set.file.iter().find(|f| f.name() == name).unwrap()
    }

    const SHOP: &str = r#"
syntax = "proto3";
package shop.v1;

message Item {
  string sku = 1;
  map<string, int32> stock = 2;
  optional string note = 3;
  oneof price {
    int64 cents = 4;
    string label = 5;
  }
  repeated Tag tags = 6;
  enum Tag {
    TAG_UNSPECIFIED = 0;
    TAG_SALE = 1;
  }
  reserved 9, 12 to 15;
  reserved "legacy";
}

service Shop {
  rpc Get(Item) returns (Item);
  rpc Watch(Item) returns (stream Item);
  rpc Upload(stream Item) returns (Item);
  rpc Chat(stream Item) returns (stream Item);
}
"#;

    #[test]
    fn renders_proto3_constructs() {
        let set = compile(&[("shop.proto", SHOP)], "shop.proto");
        let source = to_proto_source(file(&set, "shop.proto"));

        assert!(source.starts_with("syntax = \"proto3\";"));
        assert!(source.contains("package shop.v1;"));
        assert!(source.contains("map<string, int32> stock = 2;"));
        assert!(source.contains("optional string note = 3;"));
        assert!(source.contains("oneof price {"));
        assert!(source.contains("repeated .shop.v1.Item.Tag tags = 6;"));
        assert!(source.contains("reserved 9, 12 to 15;"));
        assert!(source.contains("reserved \"legacy\";"));
        assert!(source.contains("rpc Chat(stream .shop.v1.Item) returns (stream .shop.v1.Item);"));
        assert!(!source.contains("StockEntry"));
        assert!(!source.contains("_note"));
    }

    #[test]
    fn rendered_source_compiles_to_the_same_services() {
        let original = compile(&[("shop.proto", SHOP)], "shop.proto");
        let rendered = to_proto_source(file(&original, "shop.proto"));
        let reparsed = compile(&[("shop.proto", &rendered)], "shop.proto");

        let methods = |set: prost_types::FileDescriptorSet| {
            let pool = DescriptorPool::from_file_descriptor_set(set).unwrap();
            pool.services()
                .flat_map(|s| {
                    s.methods()
                        .map(|m| {
                            (
                                s.full_name().to_string(),
                                m.name().to_string(),
                                m.is_client_streaming(),
                                m.is_server_streaming(),
                            )
                        })
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        };

        assert_eq!(methods(original), methods(reparsed));
    }

    #[test]
    fn renders_imports_and_proto2_labels() {
        let common = r#"
syntax = "proto2";
package common;
message Money {
  required int64 units = 1;
  optional string currency = 2 [default = "EUR"];
  extensions 100 to max;
}
"#;
        let order = r#"
syntax = "proto2";
package orders;
import public "common/money.proto";
extend common.Money {
  optional bool taxed = 100;
}
message Order {
  repeated common.Money lines = 1;
}
"#;
        let set = compile(
            &[("common/money.proto", common), ("orders.proto", order)],
            "orders.proto",
        );

        let money = to_proto_source(file(&set, "common/money.proto"));
        assert!(money.contains("required int64 units = 1;"));
        assert!(money.contains("optional string currency = 2 [default = \"EUR\"];"));
        assert!(money.contains("extensions 100 to max;"));

        let orders = to_proto_source(file(&set, "orders.proto"));
        assert!(orders.contains("import public \"common/money.proto\";"));
        assert!(orders.contains("extend .common.Money {"));
        assert!(orders.contains("optional bool taxed = 100;"));
        assert!(orders.contains("repeated .common.Money lines = 1;"));
    }
}
