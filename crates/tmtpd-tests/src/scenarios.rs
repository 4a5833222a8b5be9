//! Core protocol scenarios: registration, self-ping, multi-node
//! delivery, and the connection state machine.
