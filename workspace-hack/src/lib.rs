// This file is generated by `cargo hakari`. Do not edit.
