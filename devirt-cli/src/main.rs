//! Command-line front end sequencing the five pipeline components:
//! `ResourceLocator` → split the embedded resource into its two cipher
//! streams → `HandlerMatcher` → `OpcodeTable` → `MethodTranslator`, over
//! every virtualized method the input assembly contains.
//!
//! Does not write a patched PE back out: the output is a textual IL dump of
//! every method that translated successfully, each annotated with its
//! original metadata token, so the result can be diffed or read directly.

use std::io::Cursor;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use devirt_asm::raw::assembly::Assembly;
use devirt_asm::raw::heaps::table::{MethodDefTable, TableHeap};
use devirt_asm::raw::heaps::{BlobHeap, StringHeap};
use devirt_asm::raw::il::OpCode;
use devirt_asm::raw::indices::metadata_token::MetadataToken;
use devirt_asm::raw::pe::PEFile;
use devirt_asm::raw::FromByteStream;
use devirt_core::{names, translate_all, HandlerMatcher, Operand, OpcodeTable, ResolvedOperand, ResourceLocatorConfig, TranslatedMethod};

#[derive(Parser, Debug)]
#[command(name = "devirt", about = "Devirtualizes Eazfuscator.NET-protected .NET assemblies")]
struct Args {
	/// Protected assembly to read.
	input: PathBuf,
	/// Destination for the translated-IL text dump.
	output: PathBuf,
	/// Repeatable: `-v` for info, `-vv` for trace.
	#[arg(short = 'v', action = clap::ArgAction::Count)]
	verbose: u8,
	/// Optional path to dump per-method failures (never affects the exit code).
	#[arg(long)]
	report: Option<PathBuf>,
}

fn main() -> ExitCode {
	let args = Args::parse();
	init_tracing(args.verbose);

	match run(&args) {
		Ok(()) => ExitCode::SUCCESS,
		Err(message) => {
			eprintln!("devirt: {message}");
			ExitCode::FAILURE
		}
	}
}

fn init_tracing(verbose: u8) {
	let default_level = match verbose {
		0 => "warn",
		1 => "info",
		_ => "trace",
	};
	let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(args: &Args) -> Result<(), String> {
	let bytes = std::fs::read(&args.input).map_err(|e| format!("reading {}: {e}", args.input.display()))?;
	// Leaked rather than scoped: a one-shot process has no need to reclaim
	// it, and every raw-layer type below borrows from it for its own lifetime.
	let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());

	let pe = PEFile::read(&mut Cursor::new(bytes), &()).map_err(|e| format!("parsing PE image: {e}"))?;
	let assembly = Assembly::try_from(pe).map_err(|e| format!("parsing CLI metadata: {e}"))?;

	let (key, vm_type, resource_name) =
		devirt_core::locate(&assembly, &ResourceLocatorConfig::default()).map_err(|e| format!("locating VM resources: {e}"))?;
	tracing::info!(%resource_name, vm_type = ?vm_type, "VM dispatcher located");

	let resource = devirt_core::resource_bytes(&assembly, &resource_name).ok_or_else(|| format!("recovering resource bytes for {resource_name}"))?;
	let (instruction_ciphertext, resolver_ciphertext) =
		split_resource(resource).ok_or_else(|| "embedded resource too short to carry two cipher streams".to_string())?;

	let pe_file = assembly.pe_file();
	let metadata = assembly.metadata_root();
	let tables = metadata.get_heap::<TableHeap>().ok_or("missing #~ metadata stream")?;
	let strings = metadata.get_heap::<StringHeap>().ok_or("missing #Strings heap")?;
	let blobs = metadata.get_heap::<BlobHeap>().ok_or("missing #Blob heap")?;

	let opcodes = HandlerMatcher::run(tables, strings, blobs, pe_file, vm_type);
	tracing::info!(opcode_count = opcodes.len(), "dispatcher opcode catalog built");
	let table = OpcodeTable::build(opcodes);

	let vm_type_name = names::resolve_type_token_full_name(tables, strings, vm_type).ok_or("VM dispatcher type name unresolvable")?;
	let methods = find_virtualized_methods(tables, strings, blobs, pe_file, &vm_type_name);
	tracing::info!(method_count = methods.len(), "virtualized methods discovered");

	let (translated, report) = translate_all(instruction_ciphertext, resolver_ciphertext, &key, &table, &methods);
	if !report.is_empty() {
		tracing::warn!(failures = report.failures().len(), "some methods failed to translate");
	}

	let dump = render_dump(&translated);
	std::fs::write(&args.output, dump).map_err(|e| format!("writing {}: {e}", args.output.display()))?;

	if let Some(report_path) = &args.report {
		let lines: Vec<String> = report.failures().iter().map(|(token, error)| format!("{token:#010X}: {error}")).collect();
		std::fs::write(report_path, lines.join("\n")).map_err(|e| format!("writing report {}: {e}", report_path.display()))?;
	}

	Ok(())
}

/// The embedded resource carries both cipher streams back to back: a
/// `u32` byte length for the instruction stream's ciphertext, followed by
/// that many bytes, with everything after belonging to the resolver
/// stream. The two cipher streams are independent instances built per run,
/// with no documented shared container, so this is this crate's own choice
/// of wire layout for keeping them in one embedded resource.
fn split_resource(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
	let len_bytes: [u8; 4] = bytes.get(0..4)?.try_into().ok()?;
	let instruction_len = u32::from_le_bytes(len_bytes) as usize;
	let rest = &bytes[4..];
	if instruction_len > rest.len() {
		return None;
	}
	Some((&rest[..instruction_len], &rest[instruction_len..]))
}

fn int4_const(op: &OpCode) -> Option<i64> {
	match op {
		OpCode::ldc_i4_m1 => Some(-1),
		OpCode::ldc_i4_0 => Some(0),
		OpCode::ldc_i4_1 => Some(1),
		OpCode::ldc_i4_2 => Some(2),
		OpCode::ldc_i4_3 => Some(3),
		OpCode::ldc_i4_4 => Some(4),
		OpCode::ldc_i4_5 => Some(5),
		OpCode::ldc_i4_6 => Some(6),
		OpCode::ldc_i4_7 => Some(7),
		OpCode::ldc_i4_8 => Some(8),
		OpCode::ldc_i4_s(v) => Some(*v as i64),
		OpCode::ldc_i4(v) => Some(*v as i64),
		_ => None,
	}
}

fn call_target(op: &OpCode) -> Option<MetadataToken> {
	match op {
		OpCode::call(t) | OpCode::callvirt(t) => Some(*t),
		_ => None,
	}
}

/// A virtualized method's original body, after Eazfuscator.NET's rewrite, is
/// reduced to a short stub that loads its start offset into the instruction
/// stream and calls into the VM dispatcher; this looks for exactly that
/// shape (an `ldc.i4`-family constant and a call into `vm_type_name`
/// anywhere in the body) rather than a fixed instruction count, since the
/// stub's surrounding `nop`s/`ldarg.0` vary by calling convention and build.
/// This mirrors `HandlerMatcher::discover`'s own best-effort scan.
fn find_virtualized_methods<'l>(
	tables: &TableHeap<'l>,
	strings: &StringHeap<'l>,
	blobs: &'l BlobHeap<'l>,
	pe: &PEFile<'l>,
	vm_type_name: &str,
) -> Vec<(MetadataToken, u32)> {
	let Some(methods) = tables.get_table::<MethodDefTable>() else {
		return Vec::new();
	};
	let prefix = format!("{vm_type_name}::");

	let mut out = Vec::new();
	for index in 0..methods.len() {
		let Ok(token) = MetadataToken::try_from(0x0600_0000 | index as u32) else { continue };
		let Some(body) = names::method_body_instructions(tables, blobs, pe, token) else { continue };

		let mut offset_candidate = None;
		let mut calls_vm = false;
		for instr in &body {
			if let Some(v) = int4_const(&instr.opcode) {
				offset_candidate = Some(v);
			}
			if let Some(callee) = call_target(&instr.opcode) {
				if names::resolve_method_token_full_name(tables, strings, callee).as_deref().is_some_and(|n| n.starts_with(&prefix)) {
					calls_vm = true;
				}
			}
		}

		if let (true, Some(offset)) = (calls_vm, offset_candidate) {
			if offset >= 0 {
				out.push((token, offset as u32));
			}
		}
	}
	out
}

fn render_dump(methods: &[(MetadataToken, TranslatedMethod)]) -> String {
	let mut out = String::new();
	for (token, method) in methods {
		out.push_str(&format!("// method {:#010X}\n", token.raw()));
		out.push_str(&format!(".maxstack {}\n", method.max_stack));
		if method.init_locals {
			out.push_str(".locals init (\n");
		} else {
			out.push_str(".locals (\n");
		}
		for (i, local) in method.locals.iter().enumerate() {
			out.push_str(&format!("  [{i}] {}\n", render_resolved_operand(local)));
		}
		out.push_str(")\n");

		for (i, instr) in method.instructions.iter().enumerate() {
			let operand = render_operand(&instr.operand);
			if operand.is_empty() {
				out.push_str(&format!("  IL_{i:04}: {}\n", instr.opcode.mnemonic()));
			} else {
				out.push_str(&format!("  IL_{i:04}: {} {}\n", instr.opcode.mnemonic(), operand));
			}
		}
		out.push('\n');
	}
	out
}

fn render_operand(operand: &Operand) -> String {
	match operand {
		Operand::None => String::new(),
		Operand::Int8(v) => v.to_string(),
		Operand::Var(v) => v.to_string(),
		Operand::Int32(v) => v.to_string(),
		Operand::Int64(v) => v.to_string(),
		Operand::Float64(v) => v.to_string(),
		Operand::Branch(target) => format!("IL_{target:04}"),
		Operand::Switch(targets) => targets.iter().map(|t| format!("IL_{t:04}")).collect::<Vec<_>>().join(", "),
		Operand::Token(resolved) => render_resolved_operand(resolved),
	}
}

fn render_resolved_operand(operand: &ResolvedOperand) -> String {
	match operand {
		ResolvedOperand::Type(name) => name.clone(),
		ResolvedOperand::Member { owner, name } => format!("{owner}::{name}"),
		ResolvedOperand::String(s) => format!("{s:?}"),
		ResolvedOperand::Method(id) => format!("method#{id}"),
	}
}
