//! Tests for status, queue editing, plan and batches subcommands.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_status() {
    match parse(&["dubq", "status"]) {
        CliCommand::Status => {}
        _ => panic!("expected Status"),
    }
}

#[test]
fn cli_parse_requeue() {
    match parse(&["dubq", "requeue", "7"]) {
        CliCommand::Requeue { id } => assert_eq!(id, 7),
        _ => panic!("expected Requeue"),
    }
}

#[test]
fn cli_parse_remove() {
    match parse(&["dubq", "remove", "99"]) {
        CliCommand::Remove { id } => assert_eq!(id, 99),
        _ => panic!("expected Remove"),
    }
}

#[test]
fn cli_parse_reorder() {
    match parse(&["dubq", "reorder", "5", "0"]) {
        CliCommand::Reorder { id, index } => {
            assert_eq!(id, 5);
            assert_eq!(index, 0);
        }
        _ => panic!("expected Reorder"),
    }
}

#[test]
fn cli_reorder_needs_index() {
    assert!(Cli::try_parse_from(["dubq", "reorder", "5"]).is_err());
    assert!(Cli::try_parse_from(["dubq", "reorder", "5", "-1"]).is_err());
}

#[test]
fn cli_parse_plan() {
    match parse(&["dubq", "plan", "3"]) {
        CliCommand::Plan { id } => assert_eq!(id, 3),
        _ => panic!("expected Plan"),
    }
}

#[test]
fn cli_parse_batches() {
    match parse(&["dubq", "batches"]) {
        CliCommand::Batches { id } => assert!(id.is_none()),
        _ => panic!("expected Batches"),
    }
    match parse(&["dubq", "batches", "12"]) {
        CliCommand::Batches { id } => assert_eq!(id, Some(12)),
        _ => panic!("expected Batches with id"),
    }
}
