#[cfg(test)]
mod tests {
    use crate::api::{AttendanceResponse, FeePaymentsResponse, LoginResponse, UserData};
    use crate::models::{AttendanceRecord, Student};
    use crate::test::test_utils::{
        ADMIN, CLUB_MANAGER, NORTH_COACH, NORTH_MANAGER, SOUTH_COACH, STANDARD_PASSWORD,
        create_standard_test_db, login_test_user, setup_test_client,
    };
    use crate::validation::ValidationResponse;
    use rocket::http::{ContentType, Status};
    use serde_json::{Value, json};

    #[rocket::async_test]
    async fn test_login_api() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": NORTH_COACH,
                    "password": STANDARD_PASSWORD
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let login_response: LoginResponse = serde_json::from_str(&body).unwrap();

        assert!(login_response.success);
        let user = login_response.user.unwrap();
        assert_eq!(user.email, NORTH_COACH);
        assert_eq!(user.role, "coach");

        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": NORTH_COACH,
                    "password": "wrong_password"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let login_response: LoginResponse = serde_json::from_str(&body).unwrap();

        assert!(!login_response.success);
        assert!(login_response.error.is_some());
    }

    #[rocket::async_test]
    async fn test_auth_required_apis() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let endpoints = vec![
            "/api/me",
            "/api/students",
            "/api/centers",
            "/api/attendance",
            "/api/fee_payments",
            "/api/dashboard/stats",
        ];

        for endpoint in endpoints {
            let response = client.get(endpoint).dispatch().await;
            assert_eq!(
                response.status(),
                Status::Unauthorized,
                "Endpoint {} did not require authentication",
                endpoint
            );
        }

        let response = client.get("/api/health").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
    }

    #[rocket::async_test]
    async fn test_me_reports_capabilities() {
        let test_db = create_standard_test_db().await;
        let north = test_db.center_id("North");
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, NORTH_MANAGER).await;

        let response = client.get("/api/me").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let me: UserData = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(me.role, "center_manager");
        assert_eq!(me.center_id, Some(north));
        assert!(me.capabilities.can_mutate_finance);
        assert!(!me.capabilities.can_view_all_centers);
        assert!(!me.capabilities.can_mutate_users);
    }

    #[rocket::async_test]
    async fn test_coach_center_filter_is_overridden() {
        let test_db = create_standard_test_db().await;
        let north = test_db.center_id("North");
        let south = test_db.center_id("South");
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, SOUTH_COACH).await;

        let response = client
            .get(format!("/api/students?center={}", north))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let students: Vec<Student> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(students.len(), 2);
        assert!(students.iter().all(|s| s.center_id == south));
    }

    #[rocket::async_test]
    async fn test_bad_filters_are_rejected() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, ADMIN).await;

        let response = client.get("/api/students?center=north").dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client
            .get("/api/attendance?date=yesterday")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client.get("/api/students?center=404").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_coach_cannot_record_payment() {
        let test_db = create_standard_test_db().await;
        let asha = test_db.student_id("Asha");
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, NORTH_COACH).await;

        let response = client
            .post("/api/fee_payments")
            .header(ContentType::JSON)
            .body(
                json!({
                    "student_id": asha,
                    "amount": 1500.0,
                    "mode": "cash"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);

        let body: ValidationResponse =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert!(body.errors.contains_key("permission"));
        assert!(!body.retry);
    }

    #[rocket::async_test]
    async fn test_fee_listing_and_totals() {
        let test_db = create_standard_test_db().await;
        let asha = test_db.student_id("Asha");
        let bilal = test_db.student_id("Bilal");
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, NORTH_MANAGER).await;

        let response = client
            .post("/api/fee_payments")
            .header(ContentType::JSON)
            .body(json!({ "student_id": asha, "amount": 3500.0, "mode": "upi" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);

        let response = client
            .post("/api/fee_payments/dues")
            .header(ContentType::JSON)
            .body(
                json!({ "student_id": bilal, "amount": 1500.0, "due_date": "2999-01-01" })
                    .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client.get("/api/fee_payments").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let fees: FeePaymentsResponse =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(fees.payments.len(), 2);
        assert_eq!(fees.totals.outstanding, 1500.0);
        assert_eq!(fees.collection_rate, 70.0);

        let response = client.get("/api/fee_payments?status=due").dispatch().await;
        let fees: FeePaymentsResponse =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(fees.payments.len(), 1);
        assert_eq!(fees.payments[0].student_id, bilal);
    }

    #[rocket::async_test]
    async fn test_invalid_payment_body() {
        let test_db = create_standard_test_db().await;
        let asha = test_db.student_id("Asha");
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, CLUB_MANAGER).await;

        let response = client
            .post("/api/fee_payments")
            .header(ContentType::JSON)
            .body(json!({ "student_id": asha, "amount": -10.0, "mode": "cash" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        let body: ValidationResponse =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert!(body.errors.contains_key("amount"));

        let response = client
            .post("/api/fee_payments")
            .header(ContentType::JSON)
            .body(json!({ "student_id": asha, "amount": 10.0, "mode": "barter" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);
    }

    #[rocket::async_test]
    async fn test_mark_and_read_attendance() {
        let test_db = create_standard_test_db().await;
        let batch = test_db.batch_id("North Morning");
        let asha = test_db.student_id("Asha");
        let bilal = test_db.student_id("Bilal");
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, NORTH_COACH).await;

        let marks = json!({
            "marks": [
                { "student_id": asha, "status": "present" },
                { "student_id": bilal, "status": "absent" }
            ]
        })
        .to_string();

        for _ in 0..2 {
            let response = client
                .put(format!("/api/attendance/batch/{}/2024-06-03", batch))
                .header(ContentType::JSON)
                .body(marks.clone())
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::Ok);

            let records: Vec<AttendanceRecord> =
                serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
            assert_eq!(records.len(), 2);
        }

        let response = client
            .get("/api/attendance?date=2024-06-03")
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let attendance: AttendanceResponse =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(attendance.records.len(), 2);
        assert_eq!(attendance.attendance_rate, 25.0);
    }

    #[rocket::async_test]
    async fn test_coach_cannot_mark_foreign_batch() {
        let test_db = create_standard_test_db().await;
        let batch = test_db.batch_id("North Morning");
        let asha = test_db.student_id("Asha");
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, SOUTH_COACH).await;

        let response = client
            .put(format!("/api/attendance/batch/{}/2024-06-03", batch))
            .header(ContentType::JSON)
            .body(json!({ "marks": [{ "student_id": asha, "status": "present" }] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let body: ValidationResponse =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert!(body.errors.contains_key("center"));
    }

    #[rocket::async_test]
    async fn test_dashboard_stats_api() {
        let test_db = create_standard_test_db().await;
        let north = test_db.center_id("North");
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, ADMIN).await;

        let response = client.get("/api/dashboard/stats").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let stats: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(stats["scope"]["kind"], "all_centers");
        assert_eq!(stats["total_students"], 6);
        assert_eq!(stats["per_center_breakdown"].as_array().unwrap().len(), 2);

        let response = client
            .get(format!("/api/dashboard/stats?center={}", north))
            .dispatch()
            .await;
        let stats: Value = serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(stats["scope"]["center_id"], north);
        assert_eq!(stats["total_students"], 4);
        assert!(stats["per_center_breakdown"].as_array().unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn test_create_user_api() {
        let test_db = create_standard_test_db().await;
        let south = test_db.center_id("South");
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, NORTH_MANAGER).await;

        let request = json!({
            "email": "new.coach@academy.test",
            "password": "a-long-password",
            "full_name": "New Coach",
            "role": "coach",
            "center_id": south
        })
        .to_string();

        let response = client
            .post("/api/users")
            .header(ContentType::JSON)
            .body(request.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        login_test_user(&client, CLUB_MANAGER).await;

        let response = client
            .post("/api/users")
            .header(ContentType::JSON)
            .body(request)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);

        let created: UserData =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(created.center_id, Some(south));
        assert!(created.capabilities.can_mark_attendance);

        let response = client
            .post("/api/users")
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": "someone@academy.test",
                    "password": "a-long-password",
                    "full_name": "Someone",
                    "role": "janitor",
                    "center_id": null
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn test_logout() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, ADMIN).await;

        let response = client.get("/api/me").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let response = client.post("/api/logout").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let response = client.get("/api/me").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }
}
