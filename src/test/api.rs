#[cfg(test)]
mod tests {
    use crate::api::{
        AuditResponse, DashboardResponse, LoginResponse, RegistrationResponse, RepairResponse,
        TeamLeaderData,
    };
    use crate::models::Gender;
    use crate::reporting::{StudentRow, TeamView};
    use crate::roster::{Reassignment, RosterIssue};
    use crate::test::utils::{
        STANDARD_PASSWORD, TestDbBuilder, create_standard_test_db, login, setup_test_client,
    };
    use crate::validation::ValidationResponse;
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::{Client, LocalResponse};
    use serde_json::{Value, json};

    async fn post_json<'c>(client: &'c Client, uri: &str, body: Value) -> LocalResponse<'c> {
        client
            .post(uri.to_string())
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await
    }

    #[rocket::async_test]
    async fn test_login_success_and_me() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;

        let login = login(&client, "staff_user", "staff").await;
        let actor = login.actor.expect("Actor should be returned");
        assert_eq!(actor.id, test_db.staff_id("staff_user"));
        assert_eq!(actor.display_name, "Staff User");
        assert_eq!(actor.role, "staff");

        let response = client.get("/api/me").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let me: Value = response.into_json().await.unwrap();
        assert_eq!(me["username"], "staff_user");
    }

    #[rocket::async_test]
    async fn test_login_with_wrong_credentials() {
        let (client, _test_db) = setup_test_client(create_standard_test_db().await).await;

        for (username, password, role) in [
            ("staff_user", "wrong password", "staff"),
            ("staff_user", STANDARD_PASSWORD, "principal"),
            ("nobody", STANDARD_PASSWORD, "staff"),
        ] {
            let response = post_json(
                &client,
                "/api/login",
                json!({"username": username, "password": password, "role": role}),
            )
            .await;
            assert_eq!(response.status(), Status::Ok);

            let body: LoginResponse = response.into_json().await.unwrap();
            assert!(!body.success);
            assert!(body.actor.is_none());
            assert_eq!(body.error.as_deref(), Some("Invalid username or password"));
        }

        let response = client.get("/api/me").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_logout_ends_session() {
        let (client, _test_db) = setup_test_client(create_standard_test_db().await).await;
        login(&client, "principal_user", "principal").await;

        let response = client.post("/api/logout").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let response = client.get("/api/dashboard").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_protected_routes_require_login() {
        let (client, _test_db) = setup_test_client(create_standard_test_db().await).await;

        for uri in [
            "/api/dashboard",
            "/api/students",
            "/api/teams",
            "/api/export/students",
            "/api/roster/audit",
        ] {
            let response = client.get(uri).dispatch().await;
            assert_eq!(response.status(), Status::Unauthorized, "GET {}", uri);
        }

        let response = post_json(
            &client,
            "/api/students",
            json!({"name": "Nora", "age": 10, "gender": "female"}),
        )
        .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_staff_cannot_use_principal_routes() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        login(&client, "staff_user", "staff").await;

        let response = post_json(
            &client,
            &format!("/api/students/{}/reassign", test_db.student_id("Dana")),
            json!({"team_leader_id": test_db.team_leader_id("Alice")}),
        )
        .await;
        assert_eq!(response.status(), Status::Forbidden);
        let body: ValidationResponse = response.into_json().await.unwrap();
        assert!(body.errors.contains_key("permission"));

        for uri in ["/api/export/teams", "/api/roster/audit"] {
            let response = client.get(uri).dispatch().await;
            assert_eq!(response.status(), Status::Forbidden, "GET {}", uri);
        }

        let response = post_json(
            &client,
            "/api/teams",
            json!({"name": "Zed", "gender": "male", "age_undertaken": 12}),
        )
        .await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_register_student() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        login(&client, "staff_user", "staff").await;

        let response = post_json(
            &client,
            "/api/students",
            json!({
                "name": "Nora",
                "age": "10",
                "gender": "F",
                "phone": "555-0111",
                "address": "3 Elm Road"
            }),
        )
        .await;
        assert_eq!(response.status(), Status::Created);

        let body: RegistrationResponse = response.into_json().await.unwrap();
        // Bella already holds Dana, so the empty Alice wins.
        assert_eq!(body.team_leader_id, test_db.team_leader_id("Alice"));
        assert_eq!(body.team_leader_name, "Alice");
        assert!(body.message.contains("Alice"));

        let response = client.get("/api/students").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let rows: Vec<StudentRow> = response.into_json().await.unwrap();
        let nora = rows.iter().find(|r| r.id == body.student_id).unwrap();
        assert_eq!(nora.age, 10);
        assert_eq!(nora.gender, Gender::Female);
        assert_eq!(nora.team_leader, "Alice");

        test_db.assert_rosters_consistent().await;
    }

    #[rocket::async_test]
    async fn test_register_student_rejects_bad_input() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        login(&client, "staff_user", "staff").await;
        let before = test_db.snapshot().await;

        let cases = [
            (json!({"name": "Nora", "age": "ten", "gender": "female"}), "validation", "error"),
            (json!({"name": "Nora", "age": 10, "gender": "unknown"}), "validation", "error"),
            (json!({"name": "", "age": 10, "gender": "female"}), "name", "error"),
            (json!({"name": "Nora", "age": 10.5, "gender": "female"}), "request", "error"),
            (json!({"name": "Nora", "age": true, "gender": "female"}), "request", "error"),
            (json!({"name": "Nora", "age": 15, "gender": "female"}), "team_leader", "warning"),
        ];

        for (payload, field, status) in cases {
            let response = post_json(&client, "/api/students", payload.clone()).await;
            assert_eq!(
                response.status(),
                Status::UnprocessableEntity,
                "payload {}",
                payload
            );
            let body: ValidationResponse = response.into_json().await.unwrap();
            assert!(
                body.errors.contains_key(field),
                "expected error on {} for {}, got {:?}",
                field,
                payload,
                body.errors
            );
            assert_eq!(body.status, status, "payload {}", payload);
        }

        assert_eq!(test_db.snapshot().await, before);
    }

    #[rocket::async_test]
    async fn test_malformed_body_uses_json_envelope() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        login(&client, "staff_user", "staff").await;
        let before = test_db.snapshot().await;

        let response = client
            .post("/api/students")
            .header(ContentType::JSON)
            .body(r#"{"name": "Nora", "age": "#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body: ValidationResponse = response.into_json().await.unwrap();
        assert_eq!(body.status, "error");
        assert!(body.errors.contains_key("request"), "{:?}", body.errors);

        assert_eq!(test_db.snapshot().await, before);
    }

    #[rocket::async_test]
    async fn test_principal_manages_teams_and_reassigns() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        login(&client, "principal_user", "principal").await;

        let response = post_json(
            &client,
            "/api/teams",
            json!({"name": "Gail", "gender": "female", "age_undertaken": "11"}),
        )
        .await;
        assert_eq!(response.status(), Status::Created);
        let gail: TeamLeaderData = response.into_json().await.unwrap();
        assert_eq!(gail.age_undertaken, 11);
        assert_eq!(gail.gender, Gender::Female);
        assert_eq!(gail.student_count, 0);

        let dana = test_db.student_id("Dana");
        let response = post_json(
            &client,
            &format!("/api/students/{}/reassign", dana),
            json!({"team_leader_id": gail.id}),
        )
        .await;
        assert_eq!(response.status(), Status::Ok);
        let outcome: Reassignment = response.into_json().await.unwrap();
        assert_eq!(
            outcome,
            Reassignment {
                student_id: dana,
                from: Some(test_db.team_leader_id("Bella")),
                to: gail.id,
                changed: true,
            }
        );

        let response = client.get("/api/teams").dispatch().await;
        let teams: Vec<TeamView> = response.into_json().await.unwrap();
        let gail_view = teams.iter().find(|t| t.id == gail.id).unwrap();
        assert_eq!(gail_view.student_count, 1);
        assert_eq!(gail_view.students[0].name, "Dana");
        let bella_view = teams.iter().find(|t| t.name == "Bella").unwrap();
        assert_eq!(bella_view.student_count, 0);

        test_db.assert_rosters_consistent().await;
    }

    #[rocket::async_test]
    async fn test_reassign_missing_records() {
        let (client, test_db) = setup_test_client(create_standard_test_db().await).await;
        login(&client, "principal_user", "principal").await;
        let before = test_db.snapshot().await;

        let response = post_json(
            &client,
            &format!("/api/students/{}/reassign", test_db.student_id("Dana")),
            json!({"team_leader_id": 9999}),
        )
        .await;
        assert_eq!(response.status(), Status::NotFound);

        let response = post_json(
            &client,
            "/api/students/9999/reassign",
            json!({"team_leader_id": test_db.team_leader_id("Alice")}),
        )
        .await;
        assert_eq!(response.status(), Status::NotFound);

        assert_eq!(test_db.snapshot().await, before);
    }

    #[rocket::async_test]
    async fn test_exports() {
        let (client, _test_db) = setup_test_client(create_standard_test_db().await).await;
        login(&client, "principal_user", "principal").await;

        let response = client.get("/api/export/students").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.content_type(), Some(ContentType::CSV));
        assert_eq!(
            response.headers().get_one("Content-Disposition"),
            Some("attachment; filename=students.csv")
        );
        let body = response.into_string().await.unwrap();
        assert!(body.starts_with("Name,Age,Gender,Phone,Address,Team Leader\r\n"));
        assert!(body.contains("Dana,10,female,555-0100,1 Test Street,Bella\r\n"));

        let response = client.get("/api/export/teams").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(
            response.headers().get_one("Content-Disposition"),
            Some("attachment; filename=teams.csv")
        );
        let body = response.into_string().await.unwrap();
        assert!(body.contains("Team: Alice - Age: 10 - Gender: female,,,\r\nNo students in this team,,,\r\n"));
        assert!(body.contains("Team: Carl - Age: 11 - Gender: male,,,\r\nStudent Name,Age,Gender,Phone\r\nEvan,11,male,555-0100\r\n"));
    }

    #[rocket::async_test]
    async fn test_audit_and_repair_endpoints() {
        let test_db = TestDbBuilder::new()
            .principal("principal_user")
            .team_leader("T1", 10, Gender::Female)
            .student("ok", 10, Gender::Female, "T1")
            .inconsistent_student("missing", 10, Gender::Female, Some("T1"), &[])
            .build()
            .await
            .unwrap();
        let (client, test_db) = setup_test_client(test_db).await;
        login(&client, "principal_user", "principal").await;

        let response = client.get("/api/roster/audit").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let audit: AuditResponse = response.into_json().await.unwrap();
        assert!(!audit.consistent);
        assert!(!audit.strict);
        assert_eq!(
            audit.issues,
            vec![RosterIssue::MissingMembership {
                student_id: test_db.student_id("missing"),
                team_leader_id: test_db.team_leader_id("T1"),
            }]
        );

        let response = client.post("/api/roster/repair").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let repair: RepairResponse = response.into_json().await.unwrap();
        assert_eq!(repair.repaired, 1);
        assert!(repair.remaining.is_empty());

        test_db.assert_rosters_consistent().await;
    }

    #[rocket::async_test]
    async fn test_staff_signup() {
        let (client, _test_db) = setup_test_client(create_standard_test_db().await).await;

        let response = post_json(
            &client,
            "/api/staff/signup",
            json!({"name": "New Staff", "username": "new_staff", "password": "secret1"}),
        )
        .await;
        assert_eq!(response.status(), Status::Created);
        login(&client, "new_staff", "staff").await;

        let response = post_json(
            &client,
            "/api/staff/signup",
            json!({"name": "Again", "username": "new_staff", "password": "secret1"}),
        )
        .await;
        assert_eq!(response.status(), Status::Conflict);
        let body: ValidationResponse = response.into_json().await.unwrap();
        assert!(body.errors.contains_key("username"));

        let response = post_json(
            &client,
            "/api/staff/signup",
            json!({"name": "Short", "username": "ab", "password": "123"}),
        )
        .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);
        let body: ValidationResponse = response.into_json().await.unwrap();
        assert!(body.errors.contains_key("username"));
        assert!(body.errors.contains_key("password"));
    }

    #[rocket::async_test]
    async fn test_dashboard() {
        let (client, _test_db) = setup_test_client(create_standard_test_db().await).await;
        login(&client, "staff_user", "staff").await;

        let response = client.get("/api/dashboard").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let dashboard: DashboardResponse = response.into_json().await.unwrap();

        assert_eq!(dashboard.actor.username, "staff_user");
        assert_eq!(dashboard.student_count, 2);
        assert_eq!(dashboard.team_leader_count, 3);
        assert_eq!(dashboard.staff_count, 1);
        assert_eq!(dashboard.recent_students.len(), 2);
        assert!(dashboard.can_register_students);
        assert!(!dashboard.can_manage_team_leaders);

        let ages: Vec<i64> = dashboard.teams.iter().map(|t| t.age_undertaken).collect();
        assert_eq!(ages, vec![10, 10, 11]);
    }

    #[rocket::async_test]
    async fn test_health() {
        let (client, _test_db) = setup_test_client(create_standard_test_db().await).await;

        let response = client.get("/api/health").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().await.unwrap(), "OK");
    }
}
