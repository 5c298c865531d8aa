mod app;
mod catalog;
mod support;
mod web;
