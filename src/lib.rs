//! Turnstile - Admission Control for HTTP Services
//!
//! This crate implements an admission-control layer that sits between inbound
//! requests and the rest of an application. It tracks per-key request counts
//! over fixed time windows and rejects requests that exceed a configured
//! quota, answering with a structured retry hint rather than an error.

pub mod admission;
pub mod config;
pub mod error;
pub mod http;
